//! Request/response types and the transport seam. The session layer never talks
//! to `reqwest` directly; it hands a fully decorated [`ApiRequest`] to a
//! [`Transport`] and gets back status + JSON body.
//!
//! `HttpTransport` keeps a cookie store so the refresh cookie set by the login
//! endpoint is sent back to the refresh and logout endpoints automatically.
//! Clones of one `HttpTransport` share that cookie store; scopes of the same
//! origin should share a transport.

use super::{
    config::SessionConfig,
    error::{SessionError, SessionResult},
};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, Instrument};

#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    retried: bool,
    refresh_exempt: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
            refresh_exempt: false,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON payload.
    ///
    /// # Errors
    /// Returns `SessionError::Serialization` if `body` cannot be encoded.
    pub fn with_body<B: Serialize>(self, body: &B) -> SessionResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| SessionError::Serialization(format!("Failed to encode request: {err}")))?;
        Ok(self.json(value))
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Marks a request whose `401` means "bad credentials submitted" rather than
    /// "access token expired" (login, second-factor verification). Such a
    /// response is returned to the caller without attempting a refresh.
    #[must_use]
    pub fn exempt_from_refresh(mut self) -> Self {
        self.refresh_exempt = true;
        self
    }

    #[must_use]
    pub fn is_refresh_exempt(&self) -> bool {
        self.refresh_exempt
    }

    /// Whether this request has already been replayed after a refresh.
    #[must_use]
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }
}

#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub url: String,
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    /// Success statuses pass through, everything else becomes `SessionError::Http`.
    ///
    /// # Errors
    /// Returns `SessionError::Http` for non-2xx statuses.
    pub fn into_result(self) -> SessionResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(SessionError::http(self.status, &self.body))
        }
    }

    /// Decodes the JSON body.
    ///
    /// # Errors
    /// Returns `SessionError::Parse` if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> SessionResult<T> {
        T::deserialize(&self.body)
            .map_err(|err| SessionError::Parse(format!("Failed to decode response: {err}")))
    }
}

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends an already decorated request. Non-2xx statuses are not errors at
    /// this level; only failures to get a response are.
    async fn execute(&self, request: &ApiRequest) -> SessionResult<ApiResponse>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: SessionConfig,
}

impl HttpTransport {
    /// Build a transport with a cookie store, timeouts and user agent from `config`.
    ///
    /// # Errors
    /// Returns `SessionError::Config` if the HTTP client cannot be constructed.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .cookie_store(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SessionError::Config(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
        let url = self.config.endpoint_url(&request.path);
        let span = tracing::debug_span!(
            "http.request",
            http.method = %request.method,
            url = %url
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(ACCEPT, "application/json")
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .instrument(span)
            .await
            .map_err(map_request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_request_error)?;
        debug!("{} {} -> {}", request.method, url, status);

        Ok(ApiResponse {
            url,
            status,
            body: parse_body(&text),
        })
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.config.api_base_url.as_str())
            .field("user_agent", &self.config.user_agent)
            .finish()
    }
}

fn map_request_error(err: reqwest::Error) -> SessionError {
    if err.is_timeout() {
        SessionError::Timeout("Request timed out. Please try again.".to_string())
    } else {
        SessionError::Network(format!("Unable to reach the server: {err}"))
    }
}

/// Empty bodies become `Null`, non-JSON bodies are kept as a string.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
