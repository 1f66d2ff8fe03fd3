use std::{fmt, time::Duration};

use scraper::{ElementRef, Html};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub use reqwest::StatusCode;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    HttpErr(#[from] reqwest::Error),

    #[error("{url} responded with {status}")]
    Status {
        url: Url,
        status: StatusCode,
    },

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    #[error("No session id in login response")]
    NoSession,

    #[error("No element with id {0:?}")]
    MissingElement(String),

    #[error("Element {0:?} has no value attribute")]
    MissingValue(String),
}

type Result<T> = std::result::Result<T, Error>;

// All WebDialog pages live under this path on the controller.
const BASE_PATH: &str = "/neura/mobile/jsp/";
const LOGIN_PAGE: &str = "login.jsp";
const MAIN_MENU: &str = "mainmenu.jsp";

// Inner pages carry the session as a hidden form field, not a cookie.
const SESSION_FIELD: &str = "SESSIONID";

// The controller declares this in every page while actually sending UTF-8.
const DECLARED_CHARSET: &str = "windows-1252";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque token returned by a successful login. Only valid until the controller drops the session, so it should not
/// outlive a single polling cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(..)")
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

#[derive(Debug)]
pub struct ClientBuilder {
    host: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl ClientBuilder {
    /// `host` is either the bare address of the controller or a complete base URL for its WebDialog pages.
    pub fn new<H>(host: H) -> Self
    where
        H: Into<String>,
    {
        Self {
            host: host.into(),
            user: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn credentials<U, P>(mut self, user: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<String>,
    {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Applies to every request individually, not to a whole login or fetch.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Client> {
        let base = base_url(&self.host)?;
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()?;

        Ok(Client {
            http,
            base,
            user: self.user,
            password: self.password,
        })
    }
}

pub struct Client {
    http: reqwest::Client,
    base: Url,
    user: String,
    password: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base", &self.base.as_str())
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves a page path relative to the WebDialog base. Absolute URLs are returned unchanged.
    pub fn page_url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(base = %self.base))]
    pub async fn login(&self) -> Result<SessionId> {
        // The login form is only accepted once the controller has handed out its cookie.
        let response = self.http.get(self.base.join(LOGIN_PAGE)?).send().await?;
        check_status(response)?;

        let response = self
            .http
            .post(self.base.join(MAIN_MENU)?)
            .form(&[
                ("USER", self.user.as_str()),
                ("PASSWORD", self.password.as_str()),
                ("loginButton", "LOGIN"),
            ])
            .send()
            .await?;
        let body = read_body(response).await?;

        let session = Page::parse(&body).session_id().ok_or(Error::NoSession)?;
        debug!("Got WebDialog session");
        Ok(session)
    }

    #[tracing::instrument(level = "debug", skip(self, session), fields(url = %url))]
    pub async fn fetch(&self, url: &Url, session: &SessionId) -> Result<String> {
        let response = self
            .http
            .post(url.clone())
            .form(&[(SESSION_FIELD, session.as_str())])
            .send()
            .await?;
        read_body(response).await
    }
}

fn base_url(host: &str) -> Result<Url> {
    if !host.contains("://") {
        return Ok(Url::parse(&format!("http://{}{}", host, BASE_PATH))?);
    }

    let mut url = Url::parse(host)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Status {
            url: response.url().clone(),
            status,
        })
    }
}

async fn read_body(response: reqwest::Response) -> Result<String> {
    let bytes = check_status(response)?.bytes().await?;
    Ok(decode_body(&bytes))
}

/// Decodes a WebDialog response body, ignoring the charset the controller claims to use.
///
/// Pages declare `windows-1252` but the bytes on the wire are UTF-8. Should a body ever fail to decode as UTF-8 it is
/// read as Latin-1 instead, which is close enough to `windows-1252` for the unit suffixes we care about. Either way the
/// stale declaration is rewritten so the markup agrees with its contents.
pub fn decode_body(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(error) => {
            warn!(%error, "Body is not UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    };
    text.replace(DECLARED_CHARSET, "UTF-8")
}

/// A parsed WebDialog page.
pub struct Page {
    html: Html,
}

impl Page {
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
        }
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.html.root_element().descendants().filter_map(ElementRef::wrap)
    }

    /// Reads the `value` attribute of the first element whose id is exactly `id`.
    pub fn element_value(&self, id: &str) -> Result<&str> {
        let element = self
            .elements()
            .find(|el| el.value().id() == Some(id))
            .ok_or_else(|| Error::MissingElement(id.to_owned()))?;

        element
            .value()
            .attr("value")
            .ok_or_else(|| Error::MissingValue(id.to_owned()))
    }

    /// The session handed out by the main menu after a successful login. Failed logins render the login form again,
    /// which has no such field.
    pub fn session_id(&self) -> Option<SessionId> {
        self.elements()
            .find(|el| el.value().attr("name") == Some(SESSION_FIELD))
            .and_then(|el| el.value().attr("value"))
            .filter(|id| !id.is_empty())
            .map(SessionId::from)
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn test_base_url_from_bare_host() {
    let url = base_url("192.168.1.20").unwrap();
    assert_eq!(url.as_str(), "http://192.168.1.20/neura/mobile/jsp/");
    assert_eq!(
        url.join("schema.jsp").unwrap().as_str(),
        "http://192.168.1.20/neura/mobile/jsp/schema.jsp"
    );
}

#[test]
fn test_base_url_gains_trailing_slash() {
    let url = base_url("http://heatpump.local:8080/neura/mobile/jsp").unwrap();
    assert_eq!(url.as_str(), "http://heatpump.local:8080/neura/mobile/jsp/");
}

#[test]
fn test_page_url_keeps_absolute_urls() {
    let client = ClientBuilder::new("10.0.0.5").build().unwrap();
    let url = client.page_url("http://10.0.0.6/other.jsp").unwrap();
    assert_eq!(url.as_str(), "http://10.0.0.6/other.jsp");
}

#[test]
fn test_decode_body_rewrites_declared_charset() {
    let body = "<meta charset=\"windows-1252\"><span value=\"21.5°C\">".as_bytes();
    assert_eq!(
        decode_body(body),
        "<meta charset=\"UTF-8\"><span value=\"21.5°C\">"
    );
}

#[test]
fn test_decode_body_falls_back_to_latin1() {
    let body = b"<span value=\"21.5\xb0C\">";
    assert_eq!(decode_body(body), "<span value=\"21.5°C\">");
}

#[test]
fn test_element_value() {
    let page = Page::parse(
        r#"<html><body>
            <input id="flow" value="34.2°C">
            <span id="heater_rod" value="OFF"></span>
            <div id="label">Flow</div>
        </body></html>"#,
    );

    assert_eq!(page.element_value("flow").unwrap(), "34.2°C");
    assert_eq!(page.element_value("heater_rod").unwrap(), "OFF");
    assert!(matches!(
        page.element_value("label"),
        Err(Error::MissingValue(id)) if id == "label"
    ));
    assert!(matches!(
        page.element_value("Flow"),
        Err(Error::MissingElement(id)) if id == "Flow"
    ));
}

#[test]
fn test_element_value_takes_first_match() {
    let page = Page::parse(r#"<span id="room" value="20.0"></span><span id="room" value="99.0"></span>"#);
    assert_eq!(page.element_value("room").unwrap(), "20.0");
}

#[test]
fn test_session_id() {
    let page = Page::parse(
        r#"<form action="schema.jsp" method="post">
            <input type="hidden" name="SESSIONID" value="A1B2C3">
        </form>"#,
    );
    assert_eq!(page.session_id(), Some(SessionId::from("A1B2C3")));
}

#[test]
fn test_session_id_missing_or_empty() {
    let login_form = Page::parse(
        r#"<form action="mainmenu.jsp"><input name="USER"><input name="PASSWORD" type="password"></form>"#,
    );
    assert_eq!(login_form.session_id(), None);

    let empty = Page::parse(r#"<input type="hidden" name="SESSIONID" value="">"#);
    assert_eq!(empty.session_id(), None);
}

#[test]
fn test_session_id_debug_is_redacted() {
    assert_eq!(format!("{:?}", SessionId::from("secret")), "SessionId(..)");
}
