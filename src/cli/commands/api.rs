use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::session::{SessionConfig, DEFAULT_API_BASE_URL};

pub const ARG_API_URL: &str = "api-url";
pub const ARG_SESSION_DIR: &str = "session-dir";
pub const ARG_TIMEOUT: &str = "timeout";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_URL)
                .long(ARG_API_URL)
                .help("Base URL of the ticketdesk API")
                .env("TICKETDESK_API_URL")
                .default_value(DEFAULT_API_BASE_URL)
                .global(true),
        )
        .arg(
            Arg::new(ARG_SESSION_DIR)
                .long(ARG_SESSION_DIR)
                .help("Directory holding the session slot (default: $XDG_RUNTIME_DIR/ticketdesk or the temp dir)")
                .env("TICKETDESK_SESSION_DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .long(ARG_TIMEOUT)
                .help("Request timeout in seconds")
                .env("TICKETDESK_TIMEOUT")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..))
                .global(true),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub api_url: Url,
    pub session_dir: PathBuf,
    pub timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if the API URL is not a valid http(s) URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let api_url = matches
            .get_one::<String>(ARG_API_URL)
            .map_or(DEFAULT_API_BASE_URL, String::as_str);
        let api_url = SessionConfig::parse(api_url)
            .context("invalid TICKETDESK_API_URL")?
            .api_base_url;

        let session_dir = matches
            .get_one::<PathBuf>(ARG_SESSION_DIR)
            .cloned()
            .unwrap_or_else(default_session_dir);

        let timeout = Duration::from_secs(matches.get_one::<u64>(ARG_TIMEOUT).copied().unwrap_or(30));

        Ok(Self {
            api_url,
            session_dir,
            timeout,
        })
    }
}

fn default_session_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join("ticketdesk")
}
