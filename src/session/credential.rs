//! Access credential and the store that owns it. The store is the only place
//! the current access token lives; reads are synchronous so the interceptor and
//! the refresh coordinator always see the latest value.

use super::slot::SessionSlot;
use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::debug;

/// Opaque bearer token. Never parsed, never logged.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Returns the raw token for placing it on the wire.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    current: RwLock<Option<Credential>>,
    slot: Arc<dyn SessionSlot>,
    key: String,
}

impl CredentialStore {
    /// Builds a store and seeds it from the slot. The slot is read exactly once.
    #[must_use]
    pub fn load(slot: Arc<dyn SessionSlot>, key: impl Into<String>) -> Self {
        let key = key.into();
        let current = slot
            .read(&key)
            .map(Credential::new)
            .filter(|credential| !credential.is_empty());
        debug!(restored = current.is_some(), "credential store loaded");

        Self {
            inner: Arc::new(StoreInner {
                current: RwLock::new(current),
                slot,
                key,
            }),
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<Credential> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replaces the held credential and mirrors it into the slot. `None` (or an
    /// empty token) clears both.
    pub fn set(&self, credential: Option<Credential>) {
        let credential = credential.filter(|credential| !credential.is_empty());
        let mut current = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match &credential {
            Some(value) => self.inner.slot.write(&self.inner.key, value.expose()),
            None => self.inner.slot.remove(&self.inner.key),
        }
        *current = credential;
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &self.inner.key)
            .field("present", &self.is_present())
            .finish()
    }
}
