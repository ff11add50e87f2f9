#![allow(dead_code, clippy::unwrap_used)]

use serde_json::{json, Value};
use std::{net::TcpListener, sync::Arc};
use ticketdesk::session::{
    ApiClient, CredentialStore, HttpTransport, MemorySlot, SessionConfig, SessionSlot, Transport,
    ACCESS_TOKEN_SLOT,
};
use wiremock::MockServer;

pub const API_PREFIX: &str = "/api/v1";

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

pub fn api_path(path: &str) -> String {
    format!("{API_PREFIX}{path}")
}

pub fn config(server: &MockServer) -> SessionConfig {
    SessionConfig::parse(&format!("{}{API_PREFIX}", server.uri())).unwrap()
}

pub fn user_json() -> Value {
    json!({
        "id": "0b7c6c1e-3f9f-4b8e-9a57-0b1c3f1f2a10",
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "role": "support"
    })
}

pub fn slot_with(token: Option<&str>) -> MemorySlot {
    token.map_or_else(MemorySlot::new, |token| {
        MemorySlot::with_entry(ACCESS_TOKEN_SLOT, token)
    })
}

/// Client over its own HTTP transport.
pub fn client(server: &MockServer, slot: &MemorySlot) -> ApiClient {
    let slot: Arc<dyn SessionSlot> = Arc::new(slot.clone());
    ApiClient::connect(config(server), slot).unwrap()
}

/// Client over a transport shared with other scopes (same cookie jar).
pub fn client_sharing(
    server: &MockServer,
    transport: &Arc<HttpTransport>,
    slot: &MemorySlot,
) -> ApiClient {
    let transport: Arc<dyn Transport> = transport.clone();
    let store = CredentialStore::load(Arc::new(slot.clone()), ACCESS_TOKEN_SLOT);
    ApiClient::new(config(server), transport, store)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
