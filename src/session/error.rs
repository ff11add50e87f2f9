use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Maximum number of error body characters kept in [`SessionError::Http`].
const MAX_ERROR_CHARS: usize = 200;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session layer.
///
/// `Clone` is required: a single refresh failure is delivered to every request
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Request failed ({status}): {message}")]
    Http { status: StatusCode, message: String },
    #[error("Response error: {0}")]
    Parse(String),
    #[error("Request error: {0}")]
    Serialization(String),
    #[error("Password reset required before signing in")]
    PasswordResetRequired,
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Builds an HTTP error from a response body, preferring the API's
    /// `{"error": "..."}` field over the raw text.
    #[must_use]
    pub fn http(status: StatusCode, body: &Value) -> Self {
        Self::Http {
            status,
            message: error_message(body),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

fn error_message(body: &Value) -> String {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return sanitize_body(message);
    }
    match body {
        Value::Null => sanitize_body(""),
        Value::String(text) => sanitize_body(text),
        other => sanitize_body(&other.to_string()),
    }
}

/// Trims and truncates error bodies before they reach callers.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}
