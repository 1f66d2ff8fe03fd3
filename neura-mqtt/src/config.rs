use std::{collections::HashSet, path::Path, time::Duration};

use itertools::Itertools;
use rumqttc::mqttbytes::valid_topic;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{value::ValueType, Error};

/// Everything a polling cycle needs to know besides how to reach the controller and the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Receives `1` or `0` once per cycle depending on whether the login succeeded.
    pub login_status_topic: String,

    /// Per HTTP request and per MQTT publish.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Treat float values with trailing garbage as failures rather than reading them leniently.
    pub strict_floats: bool,

    #[serde(alias = "dataPages")]
    pub pages: Vec<Page>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Absolute, or relative to the WebDialog base (`http://<host>/neura/mobile/jsp/`).
    pub url: String,

    #[serde(alias = "dataItems")]
    pub items: Vec<Metric>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(rename = "id", alias = "tagId", alias = "element_id")]
    pub element_id: String,

    #[serde(rename = "type")]
    pub value_type: ValueType,

    #[serde(alias = "mqttTopic")]
    pub topic: String,
}

impl Metric {
    pub fn new(element_id: &str, value_type: ValueType, topic: &str) -> Self {
        Self {
            element_id: element_id.to_owned(),
            value_type,
            topic: topic.to_owned(),
        }
    }
}

impl Default for Config {
    /// The schema page of a Neura heat pump: temperatures around the circuit and the state of its pumps and valves.
    fn default() -> Self {
        use ValueType::{Bool, Float};

        let items = [
            ("screed", Float, "Estrichtemperatur"),
            ("room", Float, "Raumtemperatur"),
            ("heater_rod", Bool, "Boiler_E_patrone"),
            ("cylinder", Float, "Boilertemperatur"),
            ("flow", Float, "Vorlauf"),
            ("return", Float, "Ruecklauf"),
            ("comp_in", Float, "Kompressor_ein"),
            ("comp_out", Float, "Kompressor_aus"),
            ("cylinder_pump", Bool, "Umschaltventil_Boilerladung"),
            ("heatpump_2", Bool, "Waermepumpe"),
            ("circulator_pump", Bool, "Umwaelzpumpe"),
        ]
        .into_iter()
        .map(|(id, value_type, name)| {
            Metric::new(id, value_type, &format!("Neura/status/{}", name))
        })
        .collect();

        Self {
            login_status_topic: "Neura/loginStatus".to_owned(),
            timeout: Duration::from_secs(10),
            strict_floats: false,
            pages: vec![Page {
                url: "schema.jsp".to_owned(),
                items,
            }],
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading config");
        let contents = std::fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Rejects registries which would publish ambiguous or unreadable telemetry. Called once at start-up, so that
    /// mistakes in the registry never surface as per-cycle failures.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pages.is_empty() {
            return Err(Error::Config("no pages configured".into()));
        }

        for page in &self.pages {
            if page.items.is_empty() {
                return Err(Error::Config(format!("page {} has no items", page.url).into()));
            }

            // Only the syntax can be checked here; relative paths are resolved against the device base later.
            if let Err(err) = url::Url::parse("http://localhost/").and_then(|base| base.join(&page.url)) {
                return Err(Error::Config(format!("page url {:?}: {}", page.url, err).into()));
            }

            if let Some(id) = page.items.iter().map(|m| &m.element_id).duplicates().next() {
                return Err(Error::Config(
                    format!("element {} appears twice on page {}", id, page.url).into(),
                ));
            }
        }

        let mut topics = HashSet::new();
        let all_topics = std::iter::once(&self.login_status_topic)
            .chain(self.metrics().map(|(_, metric)| &metric.topic));
        for topic in all_topics {
            // Publish topics may be neither empty nor contain wildcards.
            if topic.is_empty() || !valid_topic(topic) {
                return Err(Error::Config(format!("{:?} is not a valid topic", topic).into()));
            }
            if !topics.insert(topic) {
                return Err(Error::Config(
                    format!("topic {} is published by more than one metric", topic).into(),
                ));
            }
        }

        Ok(())
    }

    /// Every configured metric, paired with the page it is read from, in publishing order.
    pub fn metrics(&self) -> impl Iterator<Item = (&Page, &Metric)> {
        self.pages
            .iter()
            .flat_map(|page| page.items.iter().map(move |metric| (page, metric)))
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    config.validate().unwrap();

    assert_eq!(config.metrics().count(), 11);
    let (page, first) = config.metrics().next().unwrap();
    assert_eq!(page.url, "schema.jsp");
    assert_eq!(
        first,
        &Metric::new("screed", ValueType::Float, "Neura/status/Estrichtemperatur")
    );
}

#[test]
fn parse_minimal_config() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn parse_full_config() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({
        "login_status_topic": "X/loginStatus",
        "timeout": "2s 500ms",
        "strict_floats": true,
        "pages": [
            {
                "url": "http://10.0.0.7/neura/mobile/jsp/schema.jsp",
                "items": [
                    { "id": "temp", "type": "float", "topic": "X/temp" },
                    { "id": "flag", "type": "bool", "topic": "X/flag" }
                ]
            }
        ]
    }))
    .unwrap();

    assert_eq!(config.timeout, Duration::from_millis(2500));
    assert!(config.strict_floats);
    assert_eq!(
        config.pages[0].items,
        vec![
            Metric::new("temp", ValueType::Float, "X/temp"),
            Metric::new("flag", ValueType::Bool, "X/flag"),
        ]
    );
    config.validate().unwrap();
}

#[test]
fn parse_legacy_key_names() {
    use serde_json::json;
    let config = serde_json::from_value::<Config>(json!({
        "dataPages": [
            {
                "url": "schema.jsp",
                "dataItems": [
                    { "tagId": "room", "type": "float", "mqttTopic": "Neura/status/Raumtemperatur" }
                ]
            }
        ]
    }))
    .unwrap();

    assert_eq!(
        config.pages[0].items[0],
        Metric::new("room", ValueType::Float, "Neura/status/Raumtemperatur")
    );
}

#[cfg(test)]
fn single_page(items: Vec<Metric>) -> Config {
    Config {
        pages: vec![Page {
            url: "schema.jsp".to_owned(),
            items,
        }],
        ..Default::default()
    }
}

#[test]
fn reject_empty_page() {
    assert!(matches!(
        single_page(vec![]).validate(),
        Err(Error::Config(_))
    ));
}

#[test]
fn reject_duplicate_topics_across_pages() {
    let mut config = Config::default();
    config.pages.push(Page {
        url: "other.jsp".to_owned(),
        items: vec![Metric::new("other", ValueType::Float, "Neura/status/Vorlauf")],
    });
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn reject_metric_on_login_status_topic() {
    let config = single_page(vec![Metric::new(
        "flag",
        ValueType::Bool,
        "Neura/loginStatus",
    )]);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn reject_duplicate_element_on_page() {
    let config = single_page(vec![
        Metric::new("flow", ValueType::Float, "X/a"),
        Metric::new("flow", ValueType::Float, "X/b"),
    ]);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn reject_wildcard_topic() {
    for topic in ["X/#", "X/+/temp", ""] {
        let config = single_page(vec![Metric::new("temp", ValueType::Float, topic)]);
        assert!(config.validate().is_err(), "{:?} accepted", topic);
    }
}

#[test]
fn reject_bad_page_url() {
    let mut config = Config::default();
    config.pages[0].url = "http://[::1".to_owned();
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn example_config_matches_default() {
    let config: Config = serde_json::from_str(include_str!("../neura.example.json")).unwrap();
    assert_eq!(config, Config::default());
}
