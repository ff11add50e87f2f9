//! Authenticated API client. Every request goes out through the interceptor;
//! a `401` on an ordinary request triggers (or joins) a single refresh and the
//! request is replayed once with the new access token.

use super::{
    config::SessionConfig,
    coordinator::{RefreshCoordinator, RefreshState, Ticket},
    credential::{Credential, CredentialStore},
    error::{SessionError, SessionResult},
    interceptor,
    slot::SessionSlot,
    transport::{ApiRequest, ApiResponse, HttpTransport, Transport},
    types::SessionGrant,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    coordinator: RefreshCoordinator,
}

/// Result of looking at a response before any refresh decision.
enum Screened {
    Done(SessionResult<ApiResponse>),
    Expired,
}

impl ApiClient {
    #[must_use]
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store,
                coordinator: RefreshCoordinator::new(),
            }),
        }
    }

    /// HTTP client over `slot`, restoring any credential the slot holds.
    ///
    /// # Errors
    /// Returns `SessionError::Config` if the HTTP transport cannot be built.
    pub fn connect(config: SessionConfig, slot: Arc<dyn SessionSlot>) -> SessionResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.clone())?);
        let store = CredentialStore::load(slot, config.slot_key.clone());
        Ok(Self::new(config, transport, store))
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    #[must_use]
    pub fn refresh_state(&self) -> RefreshState {
        self.inner.coordinator.state()
    }

    /// Requests currently parked behind an in-flight refresh.
    #[must_use]
    pub fn queued_requests(&self) -> usize {
        self.inner.coordinator.queued()
    }

    /// Sends `request`, refreshing the access token and replaying once if the
    /// server reports it expired.
    ///
    /// # Errors
    /// Transport failures, non-2xx responses (after at most one replay) and
    /// refresh failures are returned as `SessionError`.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        let response = self.dispatch(&request, self.store().get()).await?;
        match self.screen(&request, response) {
            Screened::Done(result) => result,
            Screened::Expired => self.recover(request).await,
        }
    }

    /// `GET path` decoded as `T`.
    ///
    /// # Errors
    /// See [`ApiClient::send`]; decoding failures are `SessionError::Parse`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// Releases parked requests with `SessionError::Closed`.
    pub fn teardown(&self) {
        self.inner.coordinator.teardown();
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<Credential>,
    ) -> SessionResult<ApiResponse> {
        let outgoing = interceptor::authorize(request.clone(), credential.as_ref());
        self.inner.transport.execute(&outgoing).await
    }

    fn screen(&self, request: &ApiRequest, response: ApiResponse) -> Screened {
        if response.status != StatusCode::UNAUTHORIZED || request.is_refresh_exempt() {
            return Screened::Done(response.into_result());
        }
        if self.config().endpoints.is_refresh(&request.path) {
            warn!("Refresh rejected; clearing access token");
            self.store().clear();
            return Screened::Done(response.into_result());
        }
        if request.is_retried() {
            debug!("replayed request still unauthorized");
            return Screened::Done(response.into_result());
        }
        Screened::Expired
    }

    async fn recover(&self, mut request: ApiRequest) -> SessionResult<ApiResponse> {
        request.mark_retried();

        let credential = match self.inner.coordinator.enter() {
            Ticket::Wait(waiter) => waiter.await.map_err(|_| SessionError::Closed)??,
            Ticket::Lead(lease) => {
                let outcome = self.refresh().await;
                match &outcome {
                    Ok(credential) => self.store().set(Some(credential.clone())),
                    Err(_) => self.store().clear(),
                }
                let released = lease.complete(&outcome);
                match &outcome {
                    Ok(_) => info!(released, "Access token refreshed"),
                    Err(err) => warn!(released, "Refresh failed: {err}"),
                }
                outcome?
            }
        };

        let response = self.dispatch(&request, Some(credential)).await?;
        response.into_result()
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> SessionResult<Credential> {
        let request = ApiRequest::post(self.config().endpoints.refresh.clone());
        let response = self
            .dispatch(&request, self.store().get())
            .await?
            .into_result()?;
        Ok(SessionGrant::from_body(&response.body)?.access_token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::session::slot::MemorySlot;
    use async_trait::async_trait;
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };
    use tokio::sync::Semaphore;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum RefreshReply {
        Grant,
        Unauthorized,
        NetworkError,
    }

    /// Scripted API: accepts exactly one bearer token, hands out `next_token`
    /// on refresh, and can hold refresh responses until released.
    #[derive(Debug)]
    pub(crate) struct ScriptedApi {
        refresh_path: String,
        valid_token: Mutex<String>,
        next_token: Mutex<String>,
        reply: Mutex<RefreshReply>,
        gate: Semaphore,
        refresh_calls: AtomicUsize,
        log: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedApi {
        pub(crate) fn new(valid: &str, next: &str) -> Self {
            Self {
                refresh_path: "/auth/refresh".to_string(),
                valid_token: Mutex::new(valid.to_string()),
                next_token: Mutex::new(next.to_string()),
                reply: Mutex::new(RefreshReply::Grant),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                refresh_calls: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn gated(valid: &str, next: &str) -> Self {
            Self {
                gate: Semaphore::new(0),
                ..Self::new(valid, next)
            }
        }

        pub(crate) fn reply_with(&self, reply: RefreshReply) {
            *self.reply.lock().unwrap() = reply;
        }

        /// Server-side rotation: only `token` is accepted from now on, and the
        /// next refresh hands it out.
        pub(crate) fn accept_only(&self, token: &str) {
            *self.valid_token.lock().unwrap() = token.to_string();
            *self.next_token.lock().unwrap() = token.to_string();
        }

        pub(crate) fn release_refresh(&self) {
            self.gate.add_permits(1);
        }

        pub(crate) fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn calls_to(&self, path: &str) -> Vec<Option<String>> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, bearer)| bearer.clone())
                .collect()
        }
    }

    fn respond(status: StatusCode, body: serde_json::Value) -> SessionResult<ApiResponse> {
        Ok(ApiResponse {
            url: "scripted".to_string(),
            status,
            body,
        })
    }

    #[async_trait]
    impl Transport for ScriptedApi {
        async fn execute(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
            let bearer = request
                .headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_string);
            self.log
                .lock()
                .unwrap()
                .push((request.path.clone(), bearer.clone()));

            if request.path == self.refresh_path {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let _permit = self.gate.acquire().await.unwrap();
                let reply = *self.reply.lock().unwrap();
                return match reply {
                    RefreshReply::Grant => {
                        let next = self.next_token.lock().unwrap().clone();
                        *self.valid_token.lock().unwrap() = next.clone();
                        respond(StatusCode::OK, json!({ "access_token": next }))
                    }
                    RefreshReply::Unauthorized => respond(
                        StatusCode::UNAUTHORIZED,
                        json!({ "error": "invalid refresh token" }),
                    ),
                    RefreshReply::NetworkError => {
                        Err(SessionError::Network("connection reset".to_string()))
                    }
                };
            }

            if request.path == "/always-401" {
                return respond(StatusCode::UNAUTHORIZED, json!({ "error": "nope" }));
            }

            let valid = self.valid_token.lock().unwrap().clone();
            if bearer.as_deref() == Some(valid.as_str()) {
                respond(StatusCode::OK, json!({ "path": request.path }))
            } else {
                respond(StatusCode::UNAUTHORIZED, json!({ "error": "token expired" }))
            }
        }
    }

    pub(crate) fn client_over(api: &Arc<ScriptedApi>, token: Option<&str>) -> (ApiClient, MemorySlot) {
        let slot = match token {
            Some(token) => MemorySlot::with_entry("access_token", token),
            None => MemorySlot::new(),
        };
        let config = SessionConfig::parse("http://localhost:8080/api/v1").unwrap();
        let store = CredentialStore::load(Arc::new(slot.clone()), "access_token");
        let transport: Arc<dyn Transport> = api.clone();
        (ApiClient::new(config, transport, store), slot)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn valid_credential_passes_without_refresh() {
        let api = Arc::new(ScriptedApi::new("C1", "C2"));
        let (client, _) = client_over(&api, Some("C1"));

        let response = client.send(ApiRequest::get("/tickets")).await.unwrap();
        assert_eq!(response.body, json!({ "path": "/tickets" }));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_expiry_triggers_one_refresh() {
        let api = Arc::new(ScriptedApi::gated("C2", "C2"));
        let (client, slot) = client_over(&api, Some("C1"));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.send(ApiRequest::get(format!("/tickets/{i}"))).await })
            })
            .collect();

        wait_for(|| api.refresh_calls() == 1 && client.queued_requests() == 4).await;
        assert_eq!(client.refresh_state(), RefreshState::Refreshing);
        api.release_refresh();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(client.refresh_state(), RefreshState::Idle);
        assert_eq!(client.store().get(), Some(Credential::from("C2")));
        assert_eq!(slot.read("access_token").as_deref(), Some("C2"));
        for i in 0..5 {
            assert_eq!(
                api.calls_to(&format!("/tickets/{i}")),
                vec![Some("C1".to_string()), Some("C2".to_string())]
            );
        }
    }

    #[tokio::test]
    async fn second_batch_after_refresh_starts_a_new_cycle() {
        let api = Arc::new(ScriptedApi::new("C2", "C2"));
        let (client, _) = client_over(&api, Some("C1"));

        client.send(ApiRequest::get("/tickets")).await.unwrap();
        assert_eq!(api.refresh_calls(), 1);

        // Server rotates again; the next expiry refreshes once more.
        api.accept_only("C3");
        client.send(ApiRequest::get("/tickets")).await.unwrap();
        assert_eq!(api.refresh_calls(), 2);
        assert_eq!(client.store().get(), Some(Credential::from("C3")));
    }

    #[tokio::test]
    async fn refresh_network_failure_rejects_every_waiter() {
        let api = Arc::new(ScriptedApi::gated("C2", "C2"));
        api.reply_with(RefreshReply::NetworkError);
        let (client, slot) = client_over(&api, Some("C1"));

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get("/tickets/1")).await })
        };
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get("/tickets/2")).await })
        };

        wait_for(|| api.refresh_calls() == 1 && client.queued_requests() == 1).await;
        api.release_refresh();

        let expected = SessionError::Network("connection reset".to_string());
        assert_eq!(first.await.unwrap().unwrap_err(), expected);
        assert_eq!(second.await.unwrap().unwrap_err(), expected);
        assert_eq!(client.store().get(), None);
        assert!(!slot.contains("access_token"));
        assert_eq!(client.refresh_state(), RefreshState::Idle);
        assert_eq!(api.calls_to("/tickets/1").len(), 1);
        assert_eq!(api.calls_to("/tickets/2").len(), 1);

        // The failed cycle left nothing behind: the next expiry starts exactly
        // one fresh refresh.
        api.reply_with(RefreshReply::Grant);
        let third = {
            let client = client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get("/tickets/3")).await })
        };
        let fourth = {
            let client = client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get("/tickets/4")).await })
        };
        wait_for(|| api.refresh_calls() == 2 && client.queued_requests() == 1).await;
        api.release_refresh();

        assert!(third.await.unwrap().is_ok());
        assert!(fourth.await.unwrap().is_ok());
        assert_eq!(api.refresh_calls(), 2);
        assert_eq!(client.store().get(), Some(Credential::from("C2")));
        assert_eq!(client.refresh_state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn refresh_rejection_clears_credential_and_propagates() {
        let api = Arc::new(ScriptedApi::new("C2", "C2"));
        api.reply_with(RefreshReply::Unauthorized);
        let (client, _) = client_over(&api, Some("C1"));

        let err = client.send(ApiRequest::get("/tickets")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(client.store().get(), None);
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn direct_refresh_call_is_never_refreshed() {
        let api = Arc::new(ScriptedApi::new("C2", "C2"));
        api.reply_with(RefreshReply::Unauthorized);
        let (client, _) = client_over(&api, Some("C1"));

        let err = client.send(ApiRequest::post("/auth/refresh")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(client.store().get(), None);
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(client.refresh_state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn replay_is_attempted_at_most_once() {
        let api = Arc::new(ScriptedApi::new("C2", "C2"));
        let (client, _) = client_over(&api, Some("C1"));

        let err = client.send(ApiRequest::get("/always-401")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(api.calls_to("/always-401").len(), 2);
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn exempt_requests_pass_401_through() {
        let api = Arc::new(ScriptedApi::new("C2", "C2"));
        let (client, _) = client_over(&api, None);

        let err = client
            .send(ApiRequest::post("/auth/login").exempt_from_refresh())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn missing_credential_recovers_through_refresh() {
        let api = Arc::new(ScriptedApi::new("C2", "C2"));
        let (client, _) = client_over(&api, None);

        client.send(ApiRequest::get("/profile")).await.unwrap();
        assert_eq!(
            api.calls_to("/profile"),
            vec![None, Some("C2".to_string())]
        );
    }

    #[tokio::test]
    async fn teardown_releases_parked_requests() {
        let api = Arc::new(ScriptedApi::gated("C2", "C2"));
        let (client, _) = client_over(&api, Some("C1"));

        let lead = {
            let client = client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get("/tickets/1")).await })
        };
        let parked = {
            let client = client.clone();
            tokio::spawn(async move { client.send(ApiRequest::get("/tickets/2")).await })
        };
        wait_for(|| api.refresh_calls() == 1 && client.queued_requests() == 1).await;

        client.teardown();
        assert_eq!(parked.await.unwrap().unwrap_err(), SessionError::Closed);

        api.release_refresh();
        assert!(lead.await.unwrap().is_ok());
        assert_eq!(client.refresh_state(), RefreshState::Idle);
    }
}
