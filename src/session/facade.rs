//! Session facade: the single entry point a UI (or CLI) uses to sign in, sign
//! out, and issue authenticated requests, plus the observable [`AuthState`].

use super::{
    broadcast::{BroadcastHub, CrossTabEvent, SessionBroadcaster, Subscription},
    client::ApiClient,
    error::{SessionError, SessionResult},
    transport::{ApiRequest, ApiResponse},
    types::{LoginGrant, LoginRequest, SecondFactorChallenge, SessionGrant, SessionUser, VerifyRequest},
};
use reqwest::{
    header::{HeaderName, HeaderValue},
    StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Header carrying the second-factor challenge reference.
pub const SECOND_FACTOR_HEADER: &str = "x-2fa-token";
/// Error code the login endpoint uses when the password must be reset first.
const PASSWORD_RESET_REQUIRED: &str = "password_reset_required";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// Rehydration has not finished yet.
    Loading,
    Authenticated(SessionUser),
    Anonymous,
}

impl AuthState {
    #[must_use]
    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            Self::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    /// Password accepted; a one-time code must be verified against `challenge`.
    SecondFactorRequired { challenge: SecondFactorChallenge },
    Established(SessionUser),
}

/// Cheap to clone; clones share one session scope.
#[derive(Clone)]
pub struct SessionFacade {
    inner: Arc<FacadeInner>,
}

struct FacadeInner {
    client: ApiClient,
    broadcaster: SessionBroadcaster,
    state: watch::Sender<AuthState>,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionFacade {
    /// Creates the scope's facade in `Loading` and starts listening for events
    /// from other scopes on `hub`. Call [`SessionFacade::rehydrate`] next.
    #[must_use]
    pub fn init(client: ApiClient, hub: &BroadcastHub) -> Self {
        let (state, _) = watch::channel(AuthState::Loading);
        let inner = Arc::new(FacadeInner {
            client,
            broadcaster: hub.open(),
            state,
            subscription: Mutex::new(None),
        });

        let weak: Weak<FacadeInner> = Arc::downgrade(&inner);
        let subscription = inner.broadcaster.subscribe(move |event| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.reconcile(event).await;
                }
            }
        });
        *inner.subscription_slot() = Some(subscription);

        Self { inner }
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn user(&self) -> Option<SessionUser> {
        self.inner.state.borrow().user().cloned()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    /// Resolves `Loading` from the restored credential: with one, the profile is
    /// fetched (refreshing if needed); without one, the scope is anonymous.
    #[instrument(skip(self))]
    pub async fn rehydrate(&self) -> AuthState {
        let inner = &self.inner;
        if !inner.client.store().is_present() {
            debug!("no stored credential; anonymous");
            inner.set_state(AuthState::Anonymous);
            return self.state();
        }

        match inner.fetch_profile().await {
            Ok(user) => {
                info!(user = %user.email, "session restored");
                inner.set_state(AuthState::Authenticated(user));
            }
            Err(err) => {
                warn!("Session restore failed: {err}");
                inner.client.store().clear();
                inner.set_state(AuthState::Anonymous);
            }
        }
        self.state()
    }

    /// Submits identifier and secret.
    ///
    /// # Errors
    /// `SessionError::Http` for rejected credentials,
    /// `SessionError::PasswordResetRequired` when the account must reset its
    /// password first, `SessionError::Parse` for unexpected response shapes.
    #[instrument(skip(self, secret))]
    pub async fn login(&self, identifier: &str, secret: &SecretString) -> SessionResult<LoginOutcome> {
        let inner = &self.inner;
        let request = ApiRequest::post(inner.client.config().endpoints.login.clone())
            .with_body(&LoginRequest {
                email: identifier,
                password: secret.expose_secret(),
            })?
            .exempt_from_refresh();

        let response = inner.client.send(request).await.map_err(|err| match err {
            SessionError::Http { status, message }
                if status == StatusCode::FORBIDDEN && message == PASSWORD_RESET_REQUIRED =>
            {
                SessionError::PasswordResetRequired
            }
            other => other,
        })?;

        match LoginGrant::from_body(&response.body)? {
            LoginGrant::SecondFactor(challenge) => {
                info!("second factor required");
                Ok(LoginOutcome::SecondFactorRequired { challenge })
            }
            LoginGrant::Session(grant) => inner.establish(grant).await.map(LoginOutcome::Established),
        }
    }

    /// Completes a login that required a second factor.
    ///
    /// # Errors
    /// `SessionError::Http` for a wrong or expired code,
    /// `SessionError::Serialization` if the challenge cannot be sent as a header.
    #[instrument(skip(self, code, challenge))]
    pub async fn verify_second_factor(
        &self,
        code: &str,
        challenge: &SecondFactorChallenge,
    ) -> SessionResult<SessionUser> {
        let inner = &self.inner;
        let mut challenge_header = HeaderValue::from_str(challenge.expose()).map_err(|_| {
            SessionError::Serialization("Challenge reference is not a valid header value".to_string())
        })?;
        challenge_header.set_sensitive(true);

        let request = ApiRequest::post(inner.client.config().endpoints.verify_second_factor.clone())
            .header(HeaderName::from_static(SECOND_FACTOR_HEADER), challenge_header)
            .with_body(&VerifyRequest { code })?
            .exempt_from_refresh();

        let response = inner.client.send(request).await?;
        let grant = SessionGrant::from_body(&response.body)?;
        inner.establish(grant).await
    }

    /// Ends the session everywhere. The remote call is best effort; local state
    /// is cleared and other scopes are told regardless of its outcome.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let inner = &self.inner;
        let request = ApiRequest::post(inner.client.config().endpoints.logout.clone());
        if let Err(err) = inner.client.send(request).await {
            warn!("Remote logout failed: {err}");
        }
        inner.client.store().clear();
        inner.set_state(AuthState::Anonymous);
        inner.broadcaster.publish(CrossTabEvent::Logout);
        info!("signed out");
    }

    /// Authenticated request with transparent refresh. If the session was lost
    /// on the way (the refresh failed), the scope becomes anonymous.
    ///
    /// # Errors
    /// See [`ApiClient::send`].
    pub async fn request(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        let result = self.inner.client.send(request).await;
        if result.is_err() && !self.inner.client.store().is_present() && self.user().is_some() {
            warn!("Session expired; signing out locally");
            self.inner.set_state(AuthState::Anonymous);
        }
        result
    }

    /// Ends the scope: stops listening, closes the broadcaster and rejects any
    /// requests parked behind a refresh. The stored credential is kept.
    pub fn teardown(&self) {
        if let Some(subscription) = self.inner.subscription_slot().take() {
            subscription.unsubscribe();
        }
        self.inner.broadcaster.close();
        self.inner.client.teardown();
        debug!("session scope torn down");
    }
}

impl FacadeInner {
    fn subscription_slot(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: AuthState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn fetch_profile(&self) -> SessionResult<SessionUser> {
        let path = self.client.config().endpoints.profile.clone();
        self.client.get_json(&path).await
    }

    async fn establish(&self, grant: SessionGrant) -> SessionResult<SessionUser> {
        self.client.store().set(Some(grant.access_token));
        let user = match grant.user {
            Some(user) => user,
            None => match self.fetch_profile().await {
                Ok(user) => user,
                Err(err) => {
                    self.client.store().clear();
                    return Err(err);
                }
            },
        };

        info!(user = %user.email, role = %user.role, "signed in");
        self.set_state(AuthState::Authenticated(user.clone()));
        self.broadcaster.publish(CrossTabEvent::Login);
        Ok(user)
    }

    async fn reconcile(&self, event: CrossTabEvent) {
        debug!(?event, "session event from another scope");
        match event {
            CrossTabEvent::Logout => {
                self.client.store().clear();
                self.set_state(AuthState::Anonymous);
            }
            CrossTabEvent::Login => match self.fetch_profile().await {
                Ok(user) => self.set_state(AuthState::Authenticated(user)),
                Err(err) => {
                    debug!("profile fetch after remote login failed: {err}");
                    self.set_state(AuthState::Anonymous);
                }
            },
        }
    }
}

impl fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFacade")
            .field("state", &*self.inner.state.borrow())
            .field("broadcaster", &self.inner.broadcaster)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::{
        client::tests::{client_over, RefreshReply, ScriptedApi},
        credential::Credential,
        types::Role,
    };

    #[tokio::test]
    async fn rehydrate_without_credential_is_anonymous() {
        let api = Arc::new(ScriptedApi::new("C1", "C2"));
        let (client, _) = client_over(&api, None);
        let facade = SessionFacade::init(client, &BroadcastHub::default());
        assert!(facade.is_loading());

        assert_eq!(facade.rehydrate().await, AuthState::Anonymous);
        assert!(api.calls_to("/profile").is_empty());
    }

    #[tokio::test]
    async fn request_failure_after_lost_refresh_forces_anonymous() {
        let api = Arc::new(ScriptedApi::new("C1", "C2"));
        let (client, _) = client_over(&api, Some("C1"));
        let facade = SessionFacade::init(client, &BroadcastHub::default());

        // The scripted profile answers with the path only, so seed the state.
        facade.inner.set_state(AuthState::Authenticated(SessionUser {
            id: "1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Support,
        }));

        api.reply_with(RefreshReply::NetworkError);
        api.accept_only("rotated");

        let err = facade.request(ApiRequest::get("/tickets")).await.unwrap_err();
        assert!(matches!(err, SessionError::Network(_)));
        assert_eq!(facade.state(), AuthState::Anonymous);
        assert_eq!(facade.client().store().get(), None);
    }

    #[tokio::test]
    async fn failed_request_with_valid_session_keeps_state() {
        let api = Arc::new(ScriptedApi::new("C1", "C2"));
        let (client, _) = client_over(&api, Some("C1"));
        let facade = SessionFacade::init(client, &BroadcastHub::default());
        facade.inner.set_state(AuthState::Authenticated(SessionUser {
            id: "1".to_string(),
            name: String::new(),
            email: "ada@example.com".to_string(),
            role: Role::Admin,
        }));

        let err = facade.request(ApiRequest::get("/always-401")).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(facade.state().is_authenticated());
        assert_eq!(facade.client().store().get(), Some(Credential::from("C2")));
    }

    #[tokio::test]
    async fn teardown_closes_broadcaster() {
        let api = Arc::new(ScriptedApi::new("C1", "C2"));
        let (client, _) = client_over(&api, None);
        let hub = BroadcastHub::default();
        let facade = SessionFacade::init(client, &hub);

        facade.teardown();
        assert!(facade.inner.broadcaster.is_closed());
        assert!(facade.inner.subscription_slot().is_none());
        // Idempotent.
        facade.teardown();
    }
}
