//! One polling cycle: log in, walk every configured page and publish what was read.
//!
//! Failures are absorbed where they happen and reported back to the caller rather than aborting the cycle. A failed
//! login ends the cycle after its status has been published; a page that cannot be fetched skips that page; a metric
//! that cannot be read or published skips that metric.

use async_trait::async_trait;
use neura_webdialog::{self as webdialog, SessionId};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{Config, Metric},
    mqtt::Telemetry,
    value::TypedValue,
};

/// The controller's web interface as seen by a cycle.
#[async_trait(?Send)]
pub trait Device {
    async fn login(&self) -> Result<SessionId, webdialog::Error>;

    fn page_url(&self, path: &str) -> Result<Url, webdialog::Error>;

    async fn fetch(&self, url: &Url, session: &SessionId) -> Result<String, webdialog::Error>;
}

#[async_trait(?Send)]
impl Device for webdialog::Client {
    async fn login(&self) -> Result<SessionId, webdialog::Error> {
        webdialog::Client::login(self).await
    }

    fn page_url(&self, path: &str) -> Result<Url, webdialog::Error> {
        webdialog::Client::page_url(self, path)
    }

    async fn fetch(&self, url: &Url, session: &SessionId) -> Result<String, webdialog::Error> {
        webdialog::Client::fetch(self, url, session).await
    }
}

#[derive(Error, Debug)]
pub enum Failure {
    #[error("login failed: {0}")]
    Auth(#[source] webdialog::Error),

    #[error("fetching {url} failed: {source}")]
    Fetch {
        url: String,
        source: webdialog::Error,
    },

    #[error("reading {element} from {url} failed: {source}")]
    Extract {
        url: String,
        element: String,
        source: crate::Error,
    },

    #[error("publishing to {topic} failed: {source}")]
    Publish { topic: String, source: crate::Error },
}

impl Serialize for Failure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub logged_in: bool,

    /// Values that left for the broker, the login status included.
    pub published: usize,

    pub failures: Vec<Failure>,
}

impl Report {
    async fn publish<T>(&mut self, telemetry: &mut T, topic: &str, value: TypedValue)
    where
        T: Telemetry + ?Sized,
    {
        match telemetry.publish(topic, value).await {
            Ok(()) => {
                debug!(topic, %value, "Published");
                self.published += 1;
            }
            Err(source) => {
                warn!(topic, error = %source, "Publish failed");
                self.failures.push(Failure::Publish {
                    topic: topic.to_owned(),
                    source,
                });
            }
        }
    }
}

/// Runs a single cycle against `device`, publishing through `telemetry`. Never fails; everything that went wrong is
/// listed in the returned report.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn run<D, T>(device: &D, telemetry: &mut T, config: &Config) -> Report
where
    D: Device + ?Sized,
    T: Telemetry + ?Sized,
{
    let mut report = Report::default();

    let session = match device.login().await {
        Ok(session) => Some(session),
        Err(error) => {
            warn!(%error, "Login failed");
            report.failures.push(Failure::Auth(error));
            None
        }
    };
    report.logged_in = session.is_some();

    let login_status = TypedValue::Bool(report.logged_in);
    report
        .publish(telemetry, &config.login_status_topic, login_status)
        .await;

    if let Some(session) = session {
        for page in &config.pages {
            let body = match fetch(device, &page.url, &session).await {
                Ok(body) => body,
                Err(source) => {
                    warn!(url = %page.url, error = %source, "Fetch failed");
                    report.failures.push(Failure::Fetch {
                        url: page.url.clone(),
                        source,
                    });
                    continue;
                }
            };

            let document = webdialog::Page::parse(&body);
            for metric in &page.items {
                match read(&document, metric, config.strict_floats) {
                    Ok(value) => report.publish(telemetry, &metric.topic, value).await,
                    Err(source) => {
                        warn!(url = %page.url, element = %metric.element_id, error = %source, "Read failed");
                        report.failures.push(Failure::Extract {
                            url: page.url.clone(),
                            element: metric.element_id.clone(),
                            source,
                        });
                    }
                }
            }
        }
    }

    info!(
        logged_in = report.logged_in,
        published = report.published,
        failures = report.failures.len(),
        "Cycle finished"
    );
    report
}

async fn fetch<D>(device: &D, path: &str, session: &SessionId) -> Result<String, webdialog::Error>
where
    D: Device + ?Sized,
{
    let url = device.page_url(path)?;
    device.fetch(&url, session).await
}

fn read(document: &webdialog::Page, metric: &Metric, strict: bool) -> crate::Result<TypedValue> {
    let raw = document.element_value(&metric.element_id)?;
    let value = if strict {
        metric.value_type.coerce_strict(raw)?
    } else {
        metric.value_type.coerce(raw)
    };
    debug!(element = %metric.element_id, raw, %value, "Read value");
    Ok(value)
}
