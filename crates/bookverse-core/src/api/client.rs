//! API client for communicating with the BookVerse REST API.
//!
//! This module provides the `ApiClient` struct for the authentication,
//! favorites, and review feed endpoints. Every request is routed through the
//! shared `RequestAuthenticator`.

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::{AuthPayload, BookId, Envelope, FavoriteRecord, Page, RecentReview, User};

use super::{ApiError, RequestAuthenticator};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const LOGIN_PATH: &str = "/api/auth/login";
const SIGNUP_PATH: &str = "/api/auth/signup";
const LOGOUT_PATH: &str = "/api/auth/logout";
const PROFILE_PATH: &str = "/api/auth/profile";
const RECENT_REVIEWS_PATH: &str = "/api/home/recent-reviews";

pub type ApiResult<T> = Result<T, ApiError>;

/// Whether a 401 on this request should notify the unauthorized observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observe {
    Yes,
    No,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// API client for BookVerse.
/// Clone is cheap - reqwest::Client and the authenticator are Arc-backed.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    auth: RequestAuthenticator,
}

impl ApiClient {
    /// Create a new API client for the given base URL
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: RequestAuthenticator::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authenticator(&self) -> &RequestAuthenticator {
        &self.auth
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn favorites_url(&self, user_id: i64) -> String {
        self.url(&format!("/api/users/{}/favorites", user_id))
    }

    fn favorite_url(&self, user_id: i64, book_id: BookId) -> String {
        self.url(&format!("/api/users/{}/favorites/{}", user_id, book_id))
    }

    /// Send a request and unwrap the response envelope.
    ///
    /// Non-2xx statuses map to `ApiError::from_status`. A 401 on an observed
    /// request runs the unauthorized observer before the error is returned.
    /// An empty 2xx body counts as a successful envelope without data.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        observe: Observe,
    ) -> ApiResult<Envelope<T>> {
        let response = self
            .auth
            .authorize(request)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let url = response.url().path().to_string();
        debug!(url = %url, status = status.as_u16(), "Response received");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = ApiError::from_status(status, &body);
            if err.is_unauthorized() && observe == Observe::Yes {
                warn!(url = %url, "Request unauthorized, tearing down session");
                self.auth.notify_unauthorized().await;
            }
            return Err(err);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Envelope {
                success: true,
                data: None,
                message: None,
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            warn!(url = %url, error = %e, "Response did not match the envelope schema");
            ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e))
        })?;

        if !envelope.success {
            return Err(ApiError::Rejected {
                message: envelope.failure_message(),
            });
        }

        Ok(envelope)
    }

    fn require_data<T>(envelope: Envelope<T>, what: &str) -> ApiResult<T> {
        envelope
            .data
            .ok_or_else(|| ApiError::InvalidResponse(format!("Missing {} in response", what)))
    }

    // ===== Authentication =====

    /// Exchange credentials for a token. Returns the raw success envelope.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<Envelope<AuthPayload>> {
        let request = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest { email, password });
        let envelope = self.send::<AuthPayload>(request, Observe::No).await?;
        if envelope.data.is_none() {
            return Err(ApiError::InvalidResponse("Missing token in login response".to_string()));
        }
        Ok(envelope)
    }

    /// Create an account. Returns the raw success envelope.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> ApiResult<Envelope<AuthPayload>> {
        let request = self
            .client
            .post(self.url(SIGNUP_PATH))
            .json(&SignupRequest { name, email, password });
        let envelope = self.send::<AuthPayload>(request, Observe::No).await?;
        if envelope.data.is_none() {
            return Err(ApiError::InvalidResponse("Missing token in signup response".to_string()));
        }
        Ok(envelope)
    }

    /// Invalidate the active token server-side.
    ///
    /// Sent unobserved: a 401 here must not re-enter the logout procedure.
    pub async fn logout(&self) -> ApiResult<()> {
        let request = self.client.post(self.url(LOGOUT_PATH));
        self.send::<serde_json::Value>(request, Observe::No).await?;
        Ok(())
    }

    /// Fetch the profile belonging to the active token
    pub async fn fetch_profile(&self) -> ApiResult<User> {
        let request = self.client.get(self.url(PROFILE_PATH));
        let envelope = self.send(request, Observe::Yes).await?;
        Self::require_data(envelope, "user profile")
    }

    // ===== Favorites =====

    /// Fetch the favorite records of a user. A missing `data` is an empty list.
    pub async fn fetch_favorites(&self, user_id: i64) -> ApiResult<Vec<FavoriteRecord>> {
        let request = self.client.get(self.favorites_url(user_id));
        let envelope = self.send::<Vec<FavoriteRecord>>(request, Observe::Yes).await?;
        let favorites = envelope.data.unwrap_or_default();
        debug!(user_id, count = favorites.len(), "Favorites fetched");
        Ok(favorites)
    }

    pub async fn add_favorite(&self, user_id: i64, book_id: BookId) -> ApiResult<()> {
        let request = self.client.post(self.favorite_url(user_id, book_id));
        self.send::<serde_json::Value>(request, Observe::Yes).await?;
        Ok(())
    }

    pub async fn remove_favorite(&self, user_id: i64, book_id: BookId) -> ApiResult<()> {
        let request = self.client.delete(self.favorite_url(user_id, book_id));
        self.send::<serde_json::Value>(request, Observe::Yes).await?;
        Ok(())
    }

    // ===== Reviews =====

    /// Fetch the home page's recent reviews feed
    pub async fn fetch_recent_reviews(&self) -> ApiResult<Page<RecentReview>> {
        let request = self.client.get(self.url(RECENT_REVIEWS_PATH));
        let envelope = self.send(request, Observe::Yes).await?;
        Self::require_data(envelope, "recent reviews")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::UnauthorizedObserver;

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    struct CountingObserver(AtomicUsize);

    impl UnauthorizedObserver for CountingObserver {
        fn on_unauthorized(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(
            client.favorite_url(1, BookId(2)),
            "http://localhost:8080/api/users/1/favorites/2"
        );
    }

    #[tokio::test]
    async fn test_login_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(json!({"email": "ada@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"token": "t-1", "user": {"id": 1, "name": "Ada", "email": "ada@example.com"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let envelope = client.login("ada@example.com", "pw").await.unwrap();
        let payload = envelope.data.unwrap();
        assert_eq!(payload.token, "t-1");
        assert_eq!(payload.user.name, "Ada");
    }

    #[tokio::test]
    async fn test_success_false_is_rejected_with_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "Email already registered"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .signup("Ada", "ada@example.com", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected { ref message } if message == "Email already registered"));
    }

    #[tokio::test]
    async fn test_bearer_token_attached_when_armed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/profile"))
            .and(header("authorization", "Bearer t-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"id": 9, "name": "Lin", "email": "lin@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.authenticator().set_active_token("t-9");
        let user = client.fetch_profile().await.unwrap();
        assert_eq!(user.id, 9);
    }

    #[tokio::test]
    async fn test_unauthorized_runs_observer_and_returns_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/1/favorites"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        client.authenticator().install_observer(observer.clone());

        let err = client.fetch_favorites(1).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_unauthorized_is_not_observed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        client.authenticator().install_observer(observer.clone());

        assert!(client.logout().await.unwrap_err().is_unauthorized());
        assert_eq!(observer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_body_mutation_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/users/3/favorites/42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).remove_favorite(3, BookId(42)).await.unwrap();
    }

    #[tokio::test]
    async fn test_favorites_missing_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/3/favorites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        assert!(client_for(&server).fetch_favorites(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_reviews_rejects_bare_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/home/recent-reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [{"id": 1}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_recent_reviews().await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
