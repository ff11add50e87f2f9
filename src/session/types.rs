//! Wire shapes of the auth API and their decoded forms.

use super::{
    credential::Credential,
    error::{SessionError, SessionResult},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Support,
    Customer,
    Other(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Support => "support",
            Self::Customer => "customer",
            Self::Other(role) => role,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "admin" => Self::Admin,
            "support" => Self::Support,
            "customer" => Self::Customer,
            _ => Self::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(role) => role,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile of the signed-in user as returned by the profile endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl SessionUser {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Server-issued reference tying a second-factor code to the password step.
#[derive(Clone)]
pub struct SecondFactorChallenge(SecretString);

impl SecondFactorChallenge {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(SecretString::from(reference.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<&str> for SecondFactorChallenge {
    fn from(reference: &str) -> Self {
        Self::new(reference)
    }
}

impl fmt::Debug for SecondFactorChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecondFactorChallenge([REDACTED])")
    }
}

/// A granted session: the access token and, when the server included it, the
/// user profile. Login, second-factor verification and refresh all answer with
/// this shape.
#[derive(Debug)]
pub struct SessionGrant {
    pub access_token: Credential,
    pub user: Option<SessionUser>,
}

/// Decoded login response.
#[derive(Debug)]
pub enum LoginGrant {
    Session(SessionGrant),
    SecondFactor(SecondFactorChallenge),
}

#[derive(Deserialize)]
struct GrantWire {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<SessionUser>,
    #[serde(default)]
    two_fa_required: Option<bool>,
    #[serde(default)]
    two_fa_token: Option<String>,
}

impl LoginGrant {
    /// Decodes a login response body. A response that asks for a second factor
    /// must carry its challenge reference; any other response must carry an
    /// access token.
    ///
    /// # Errors
    /// Returns `SessionError::Parse` for bodies that match neither shape.
    pub fn from_body(body: &Value) -> SessionResult<Self> {
        let wire = decode_wire(body)?;
        if wire.two_fa_required.unwrap_or(false) {
            return non_empty(wire.two_fa_token)
                .map(|token| Self::SecondFactor(SecondFactorChallenge::new(token)))
                .ok_or_else(|| {
                    SessionError::Parse(
                        "Second factor required but no challenge reference was issued".to_string(),
                    )
                });
        }
        SessionGrant::from_wire(wire).map(Self::Session)
    }
}

impl SessionGrant {
    /// # Errors
    /// Returns `SessionError::Parse` when no access token is present.
    pub fn from_body(body: &Value) -> SessionResult<Self> {
        Self::from_wire(decode_wire(body)?)
    }

    fn from_wire(wire: GrantWire) -> SessionResult<Self> {
        let access_token = non_empty(wire.access_token).ok_or_else(|| {
            SessionError::Parse("Response did not include an access token".to_string())
        })?;
        Ok(Self {
            access_token: Credential::new(access_token),
            user: wire.user,
        })
    }
}

fn decode_wire(body: &Value) -> SessionResult<GrantWire> {
    GrantWire::deserialize(body)
        .map_err(|err| SessionError::Parse(format!("Failed to decode auth response: {err}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct VerifyRequest<'a> {
    pub code: &'a str,
}
