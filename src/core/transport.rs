//! REST transport
//!
//! The [`ConsoleTransport`] trait is the only way the session controller
//! reaches the server. [`HttpTransport`] implements it with reqwest; tests
//! substitute scripted transports.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::directive::OutputMessage;
use super::screen::ScreenConfig;

/// Header carrying the client identity on every request after authentication
pub const CLIENT_HEADER: &str = "Client";

/// The server holds a poll open for up to 10 seconds
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::HttpStatus(status)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl TransportError {
    /// Status code of the response, if one arrived
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::HttpStatus(status) => Some(*status),
            _ => None,
        }
    }
}

/// Opaque token issued by the server on authentication
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientIdentity({})", self.0)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Basic-auth credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /session`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub screen_size_rows: u16,
    pub screen_size_columns: u16,
}

impl From<ScreenConfig> for SessionRequest {
    fn from(config: ScreenConfig) -> Self {
        Self {
            screen_size_rows: config.rows,
            screen_size_columns: config.columns,
        }
    }
}

/// One entry from the server's system log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    /// Milliseconds since the epoch
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(deserialize_with = "null_as_default")]
    pub entity: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
}

/// The server serializes unset fields as explicit nulls
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of a successful `GET /poll`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    #[serde(default)]
    pub new_log_entries: Option<Vec<LogEntry>>,
    #[serde(default)]
    pub output_messages: Option<Vec<OutputMessage>>,
    #[serde(default)]
    pub jump_key_settings: Option<u64>,
}

impl PollResponse {
    pub fn log_entries(&self) -> &[LogEntry] {
        self.new_log_entries.as_deref().unwrap_or_default()
    }

    pub fn output_messages(&self) -> &[OutputMessage] {
        self.output_messages.as_deref().unwrap_or_default()
    }
}

/// Body of `POST /message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage {
    pub text: String,
}

/// Jump key state; ids run from 1 to 36
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite_value: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub component_values: BTreeMap<u8, bool>,
}

/// Everything the controller needs from the server
#[async_trait]
pub trait ConsoleTransport: Send + Sync {
    /// `POST /session`
    async fn create_session(
        &self,
        credentials: &Credentials,
        screen: ScreenConfig,
    ) -> Result<ClientIdentity, TransportError>;

    /// `GET /poll`
    async fn poll(&self, client: &ClientIdentity) -> Result<PollResponse, TransportError>;

    /// `POST /message`
    async fn post_message(&self, client: &ClientIdentity, text: &str) -> Result<(), TransportError>;

    /// `PUT /jumpkeys`
    async fn put_jump_keys(
        &self,
        client: &ClientIdentity,
        settings: &BTreeMap<u8, bool>,
    ) -> Result<JumpKeys, TransportError>;

    /// `GET /dump`, returning the server-side file name
    async fn dump(&self, client: &ClientIdentity) -> Result<String, TransportError>;
}

/// The server answers 201 where 200 would do; accept both
pub fn is_accepted(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::CREATED
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        let mut base = server_url.trim().to_string();
        if base.is_empty() {
            return Err(TransportError::InvalidConfig("server url cannot be empty".into()));
        }
        if !base.contains("://") {
            base = format!("http://{base}");
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|err| TransportError::InvalidConfig(format!("invalid server url: {err}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::InvalidConfig(format!("invalid {path} endpoint: {err}")))
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if is_accepted(status) {
            Ok(response)
        } else {
            Err(TransportError::HttpStatus(status))
        }
    }
}

/// Read a body that holds a single string, either JSON-quoted or bare
async fn read_string_body(response: reqwest::Response) -> Result<String, TransportError> {
    let body = response.text().await?;
    let value = serde_json::from_str::<String>(&body).unwrap_or_else(|_| body.trim().to_string());
    if value.is_empty() {
        return Err(TransportError::InvalidResponse("empty body".into()));
    }
    Ok(value)
}

#[async_trait]
impl ConsoleTransport for HttpTransport {
    async fn create_session(
        &self,
        credentials: &Credentials,
        screen: ScreenConfig,
    ) -> Result<ClientIdentity, TransportError> {
        let endpoint = self.endpoint("session")?;
        debug!("POST {}", endpoint);
        let response = self
            .client
            .post(endpoint)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .json(&SessionRequest::from(screen))
            .send()
            .await?;
        let response = Self::check(response)?;
        read_string_body(response).await.map(ClientIdentity::new)
    }

    async fn poll(&self, client: &ClientIdentity) -> Result<PollResponse, TransportError> {
        let endpoint = self.endpoint("poll")?;
        let response = self
            .client
            .get(endpoint)
            .header(CLIENT_HEADER, client.as_str())
            .send()
            .await?;
        let response = Self::check(response)?;
        Ok(response.json::<PollResponse>().await?)
    }

    async fn post_message(&self, client: &ClientIdentity, text: &str) -> Result<(), TransportError> {
        let endpoint = self.endpoint("message")?;
        debug!("POST {}", endpoint);
        let response = self
            .client
            .post(endpoint)
            .header(CLIENT_HEADER, client.as_str())
            .json(&InputMessage {
                text: text.to_string(),
            })
            .send()
            .await?;
        Self::check(response)?;
        Ok(())
    }

    async fn put_jump_keys(
        &self,
        client: &ClientIdentity,
        settings: &BTreeMap<u8, bool>,
    ) -> Result<JumpKeys, TransportError> {
        let endpoint = self.endpoint("jumpkeys")?;
        debug!("PUT {}", endpoint);
        let request = JumpKeys {
            composite_value: None,
            component_values: settings.clone(),
        };
        let response = self
            .client
            .put(endpoint)
            .header(CLIENT_HEADER, client.as_str())
            .json(&request)
            .send()
            .await?;
        let response = Self::check(response)?;
        Ok(response.json::<JumpKeys>().await?)
    }

    async fn dump(&self, client: &ClientIdentity) -> Result<String, TransportError> {
        let endpoint = self.endpoint("dump")?;
        debug!("GET {}", endpoint);
        let response = self
            .client
            .get(endpoint)
            .header(CLIENT_HEADER, client.as_str())
            .send()
            .await?;
        let response = Self::check(response)?;
        read_string_body(response).await
    }
}
