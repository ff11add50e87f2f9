//! Client-side session layer for the ticket desk API.
//!
//! One session scope (a browser tab, a CLI invocation) owns a
//! [`CredentialStore`] mirrored into a [`SessionSlot`], an [`ApiClient`] that
//! decorates requests and coordinates token refresh, and a [`SessionFacade`]
//! exposing sign-in, sign-out and the observable [`AuthState`]. Scopes of the
//! same origin share a [`BroadcastHub`] so a sign-in or sign-out in one is
//! reflected in the others.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod facade;
pub mod interceptor;
pub mod slot;
pub mod transport;
pub mod types;

pub use broadcast::{BroadcastHub, CrossTabEvent, HubMonitor, SessionBroadcaster, Subscription};
pub use client::ApiClient;
pub use config::{Endpoints, SessionConfig, ACCESS_TOKEN_SLOT, DEFAULT_API_BASE_URL};
pub use coordinator::{Pending, PendingQueue, RefreshCoordinator, RefreshState};
pub use credential::{Credential, CredentialStore};
pub use error::{SessionError, SessionResult};
pub use facade::{AuthState, LoginOutcome, SessionFacade};
pub use slot::{FileSlot, MemorySlot, SessionSlot};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use types::{Role, SecondFactorChallenge, SessionUser};
