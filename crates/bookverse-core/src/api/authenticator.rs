//! Bearer token attachment and authorization-failure observation.
//!
//! The authenticator owns the "active token" slot. The session manager arms
//! it after login/signup or when a stored credential is found, and disarms it
//! on logout. Every request built by the `ApiClient` passes through
//! `authorize`, so the token is never read back from storage per request.

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use reqwest::RequestBuilder;
use tracing::debug;

/// Reacts to a 401 response. Installed by the session manager to tear the
/// session down.
pub trait UnauthorizedObserver: Send + Sync {
    fn on_unauthorized(&self) -> BoxFuture<'_, ()>;
}

#[derive(Default)]
struct Inner {
    token: RwLock<Option<String>>,
    observer: RwLock<Option<Arc<dyn UnauthorizedObserver>>>,
}

/// Shared handle; clones see the same token slot and observer.
#[derive(Clone, Default)]
pub struct RequestAuthenticator {
    inner: Arc<Inner>,
}

impl RequestAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the authenticator with a bearer token
    pub fn set_active_token(&self, token: impl Into<String>) {
        *self.inner.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        debug!("Active token set");
    }

    /// Disarm the authenticator. Subsequent requests carry no credential.
    pub fn clear_active_token(&self) {
        *self.inner.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Active token cleared");
    }

    pub fn active_token(&self) -> Option<String> {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_armed(&self) -> bool {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Attach the active token, if any, to an outgoing request
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.active_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Install the observer notified on 401 responses, replacing any previous one
    pub fn install_observer(&self, observer: Arc<dyn UnauthorizedObserver>) {
        *self.inner.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Remove the observer. Returns whether one was installed.
    pub fn remove_observer(&self) -> bool {
        self.inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn has_observer(&self) -> bool {
        self.inner
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run the installed observer, if any, to completion
    pub(crate) async fn notify_unauthorized(&self) {
        let observer = self
            .inner
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.on_unauthorized().await;
        }
    }
}
