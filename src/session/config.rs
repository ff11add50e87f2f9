//! Endpoint and transport configuration for the session client. Values here are
//! public; secrets never live in configuration.

use super::error::{SessionError, SessionResult};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/v1";
/// Name of the per-tab slot the access token is mirrored into.
pub const ACCESS_TOKEN_SLOT: &str = "access_token";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Paths of the auth endpoints, relative to the API base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub verify_second_factor: String,
    pub refresh: String,
    pub profile: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            verify_second_factor: "/auth/verify-2fa".to_string(),
            refresh: "/auth/refresh".to_string(),
            profile: "/profile".to_string(),
            logout: "/logout".to_string(),
        }
    }
}

impl Endpoints {
    /// Whether `path` addresses the refresh endpoint. Query strings are ignored.
    #[must_use]
    pub fn is_refresh(&self, path: &str) -> bool {
        normalize_path(path) == normalize_path(&self.refresh)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub api_base_url: Url,
    pub endpoints: Endpoints,
    pub slot_key: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl SessionConfig {
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            endpoints: Endpoints::default(),
            slot_key: ACCESS_TOKEN_SLOT.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: crate::APP_USER_AGENT.to_string(),
        }
    }

    /// Parses the base URL and applies defaults for everything else.
    ///
    /// # Errors
    /// Returns `SessionError::Config` if the URL is invalid or not http(s).
    pub fn parse(api_base_url: &str) -> SessionResult<Self> {
        let url = Url::parse(api_base_url.trim())
            .map_err(|err| SessionError::Config(format!("invalid API base URL: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::new(url)),
            scheme => Err(SessionError::Config(format!(
                "unsupported API URL scheme: {scheme}"
            ))),
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Joins an API path onto the base URL, keeping the base path prefix.
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        build_url_with_base(self.api_base_url.as_str(), path)
    }
}

fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    path.trim().trim_end_matches('/')
}
