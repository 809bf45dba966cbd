//! Session state machine.
//!
//! `SessionManager` owns the current identity and is the only writer of the
//! credential store and of the authenticator's active token. State changes
//! are published through a `watch` channel so collaborators (favorites, UI)
//! can react to identity changes without polling.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, UnauthorizedObserver};
use crate::models::{AuthPayload, Envelope, User};

use super::{CredentialStore, LifetimeTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Checking for a stored credential and validating it
    Initializing,
    Anonymous,
    Authenticated,
}

/// Point-in-time view of the session.
///
/// `user` is present exactly when `state` is `Authenticated`. While `loading`
/// is true the authentication status is not settled yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub loading: bool,
    pub user: Option<User>,
}

impl SessionSnapshot {
    fn initializing() -> Self {
        Self {
            state: SessionState::Initializing,
            loading: true,
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not logged in")]
    NotAuthenticated,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Short text suitable for showing next to a form
    pub fn user_message(&self) -> String {
        match self {
            SessionError::NotAuthenticated => self.to_string(),
            SessionError::Api(e) => e.user_message(),
        }
    }
}

/// Tears the session down when any observed request comes back 401.
struct LogoutOnUnauthorized {
    session: Weak<SessionManager>,
}

impl UnauthorizedObserver for LogoutOnUnauthorized {
    fn on_unauthorized(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(session) = self.session.upgrade() {
                session.logout().await;
            }
        })
    }
}

/// Clears local session state when dropped.
struct Teardown<'a>(&'a SessionManager);

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.0.teardown();
    }
}

pub struct SessionManager {
    api: ApiClient,
    store: CredentialStore,
    state: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Create the session manager and install its 401 observer on the
    /// client's authenticator. The session starts in `Initializing`.
    pub fn new(api: ApiClient, store: CredentialStore) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            api.authenticator()
                .install_observer(Arc::new(LogoutOnUnauthorized {
                    session: weak.clone(),
                }));
            let (state, _) = watch::channel(SessionSnapshot::initializing());
            Self { api, store, state }
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().state
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    // ===== State transitions =====

    fn set_loading(&self, loading: bool) {
        self.state.send_modify(|s| s.loading = loading);
    }

    /// Loading flag after a failed login/signup: only an unfinished
    /// initialization keeps it raised.
    fn settle_loading(&self) {
        self.state
            .send_modify(|s| s.loading = s.state == SessionState::Initializing);
    }

    fn set_authenticated(&self, user: User) {
        self.state.send_modify(|s| {
            s.state = SessionState::Authenticated;
            s.loading = false;
            s.user = Some(user);
        });
    }

    fn set_anonymous(&self) {
        self.state.send_modify(|s| {
            s.state = SessionState::Anonymous;
            s.loading = false;
            s.user = None;
        });
    }

    /// Local half of logout: store, token, identity
    fn teardown(&self) {
        self.store.clear();
        self.api.authenticator().clear_active_token();
        self.set_anonymous();
    }

    fn establish(&self, payload: AuthPayload, tier: LifetimeTier) -> User {
        let AuthPayload { token, user } = payload;
        if let Err(e) = self.store.save(&token, tier == LifetimeTier::Persistent) {
            warn!(error = %e, "Failed to save credential");
        }
        self.api.authenticator().set_active_token(token);
        self.set_authenticated(user.clone());
        user
    }

    // ===== Operations =====

    /// Restore the session from the credential store.
    ///
    /// A stored token arms the authenticator and is validated with a profile
    /// fetch. Any failure runs the full logout procedure.
    pub async fn initialize(&self) -> SessionSnapshot {
        self.state.send_modify(|s| {
            s.state = SessionState::Initializing;
            s.loading = true;
        });

        let Some(credential) = self.store.load() else {
            debug!("No stored credential");
            self.set_anonymous();
            return self.snapshot();
        };

        debug!(tier = ?credential.tier, "Stored credential found, validating");
        self.api.authenticator().set_active_token(credential.token);

        match self.api.fetch_profile().await {
            Ok(user) => {
                info!(user_id = user.id, "Session restored");
                self.set_authenticated(user);
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch user profile");
                self.logout().await;
            }
        }
        self.snapshot()
    }

    /// Log in with email and password.
    ///
    /// `remember` picks the persistent tier for the token; otherwise it only
    /// lasts for the session. On failure the state is left as it was and the
    /// error is returned for display.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<User, SessionError> {
        self.set_loading(true);
        match self.api.login(email, password).await {
            Ok(Envelope {
                data: Some(payload),
                ..
            }) => {
                let user = self.establish(payload, LifetimeTier::from_remember(remember));
                info!(user_id = user.id, remember, "Login successful");
                Ok(user)
            }
            Ok(_) => {
                self.settle_loading();
                Err(ApiError::InvalidResponse("Missing token in login response".to_string()).into())
            }
            Err(e) => {
                self.settle_loading();
                warn!(error = %e, "Login failed");
                Err(e.into())
            }
        }
    }

    /// Create an account and log straight into it. The token is always
    /// remembered. Returns the server's success envelope.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Envelope<AuthPayload>, SessionError> {
        self.set_loading(true);
        match self.api.signup(name, email, password).await {
            Ok(envelope) => match envelope.data.clone() {
                Some(payload) => {
                    let user = self.establish(payload, LifetimeTier::Persistent);
                    info!(user_id = user.id, "Signup successful");
                    Ok(envelope)
                }
                None => {
                    self.settle_loading();
                    Err(ApiError::InvalidResponse("Missing token in signup response".to_string())
                        .into())
                }
            },
            Err(e) => {
                self.settle_loading();
                warn!(error = %e, "Signup failed");
                Err(e.into())
            }
        }
    }

    /// End the session.
    ///
    /// The remote logout is best effort: failures are logged and ignored.
    /// Local teardown always runs, including when this future is dropped
    /// mid-request.
    pub async fn logout(&self) {
        let _teardown = Teardown(self);
        if let Err(e) = self.api.logout().await {
            warn!(error = %e, "Logout API call failed");
        }
        info!("Logged out");
    }

    /// Re-fetch the profile of the current session. Failure logs out.
    pub async fn refresh_profile(&self) -> Result<User, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        self.set_loading(true);
        match self.api.fetch_profile().await {
            Ok(user) => {
                self.set_authenticated(user.clone());
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh user profile");
                self.logout().await;
                Err(e.into())
            }
        }
    }

    /// Remove the 401 observer from the shared authenticator. Idempotent.
    pub fn detach(&self) {
        if self.api.authenticator().remove_observer() {
            debug!("Unauthorized observer removed");
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.detach();
    }
}
