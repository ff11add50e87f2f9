use crate::cli::commands::api::Options;
use crate::session::{
    ApiClient, BroadcastHub, FileSlot, SessionConfig, SessionFacade, SessionSlot,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use url::Url;

/// Slot key for a second-factor challenge waiting for `verify-2fa`.
pub const PENDING_CHALLENGE_SLOT: &str = "pending_2fa_challenge";

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub api_url: Url,
    pub session_dir: PathBuf,
    pub timeout: Duration,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            api_url: options.api_url,
            session_dir: options.session_dir,
            timeout: options.timeout,
        }
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.api_url.clone()).with_request_timeout(self.timeout)
    }

    #[must_use]
    pub fn slot(&self) -> FileSlot {
        FileSlot::new(&self.session_dir)
    }

    /// Opens the session scope for this invocation.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn open_session(&self) -> Result<SessionFacade> {
        let slot: Arc<dyn SessionSlot> = Arc::new(self.slot());
        let client = ApiClient::connect(self.session_config(), slot)
            .context("failed to set up the API client")?;
        Ok(SessionFacade::init(client, &BroadcastHub::default()))
    }
}
