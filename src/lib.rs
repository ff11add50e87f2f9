//! # ticketdesk (session client)
//!
//! Client-side session management for the ticketdesk API. The API issues a
//! short-lived bearer access token and a long-lived refresh cookie; this crate
//! keeps the access token attached to every request and renews it when the
//! server answers `401 Unauthorized`.
//!
//! ## Refresh coordination
//!
//! Any number of requests may hit an expired token at the same time. Only the
//! first one issues `POST /auth/refresh`; every other request parks in a queue
//! until that single call settles, then replays with the new token or fails with
//! the same refresh error. A request is replayed at most once.
//!
//! ## Session scopes ("tabs")
//!
//! Several independent session scopes can share one origin through a
//! [`session::BroadcastHub`]. Each scope owns its own credential slot; login and
//! logout events travel between scopes, the token itself never does.
//!
//! ## Entry point
//!
//! [`session::SessionFacade`] wires everything together and exposes `rehydrate`,
//! `login`, `verify_second_factor` and `logout`. Domain requests go through
//! [`session::SessionFacade::request`].

pub mod cli;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
