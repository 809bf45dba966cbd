//! Recent reviews feed shown on the home page.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::RecentReview;
use crate::notify::Notifier;

const MSG_REJECTED: &str = "Failed to load recent reviews";
const MSG_UNAVAILABLE: &str = "Failed to load recent reviews. Please try again later.";

#[derive(Default)]
struct FeedState {
    reviews: Vec<RecentReview>,
    /// Refreshes in flight
    pending: usize,
    error: Option<String>,
}

pub struct RecentReviews {
    api: ApiClient,
    notifier: Arc<dyn Notifier>,
    state: Mutex<FeedState>,
}

impl RecentReviews {
    pub fn new(api: ApiClient, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            state: Mutex::new(FeedState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reviews(&self) -> Vec<RecentReview> {
        self.lock().reviews.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().pending > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Reload the feed. Failures are kept in `last_error`, never returned.
    pub async fn refresh(&self) {
        {
            let mut state = self.lock();
            state.pending += 1;
            state.error = None;
        }

        let result = self.api.fetch_recent_reviews().await;

        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        match result {
            Ok(page) => {
                debug!(count = page.items.len(), "Recent reviews loaded");
                state.reviews = page.items;
            }
            Err(ApiError::Rejected { message }) => {
                debug!(%message, "Recent reviews request rejected");
                state.error = Some(MSG_REJECTED.to_string());
            }
            Err(e) => {
                warn!(error = %e, "Error fetching recent reviews");
                state.error = Some(MSG_UNAVAILABLE.to_string());
                drop(state);
                self.notifier.error(MSG_REJECTED);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::notify::{Level, RecordingNotifier};

    async fn feed_with(response: ResponseTemplate) -> (RecentReviews, Arc<RecordingNotifier>, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/home/recent-reviews"))
            .respond_with(response)
            .mount(&server)
            .await;
        let notifier = Arc::new(RecordingNotifier::new());
        let api = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        (RecentReviews::new(api, notifier.clone()), notifier, server)
    }

    #[tokio::test]
    async fn test_refresh_loads_items() {
        let (feed, notifier, _server) = feed_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"items": [
                {"id": 1, "bookId": 4, "bookTitle": "Emma", "userName": "kit", "rating": 5},
                {"id": 2, "bookId": 6, "rating": 3, "comment": "fine"}
            ]}
        })))
        .await;

        feed.refresh().await;
        let reviews = feed.reviews();
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].book_title.as_deref(), Some("Emma"));
        assert!(!feed.is_loading());
        assert!(feed.last_error().is_none());
        assert!(notifier.entries().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_sets_error_without_notification() {
        let (feed, notifier, _server) = feed_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": false, "message": "down"})),
        )
        .await;

        feed.refresh().await;
        assert_eq!(feed.last_error().as_deref(), Some(MSG_REJECTED));
        assert!(notifier.entries().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_notifies() {
        let (feed, notifier, _server) = feed_with(ResponseTemplate::new(503)).await;

        feed.refresh().await;
        assert_eq!(feed.last_error().as_deref(), Some(MSG_UNAVAILABLE));
        assert_eq!(notifier.messages(Level::Error), vec![MSG_REJECTED]);
    }

    #[tokio::test]
    async fn test_loading_holds_until_last_refresh_finishes() {
        let server = MockServer::start().await;
        let page = json!({"success": true, "data": {"items": []}});
        Mock::given(method("GET"))
            .and(path("/api/home/recent-reviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page.clone())
                    .set_delay(Duration::from_millis(100)),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/home/recent-reviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page)
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        let api = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let feed = RecentReviews::new(api, Arc::new(RecordingNotifier::new()));

        let (_, _, loading_midway) = tokio::join!(
            feed.refresh(),
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                feed.refresh().await;
            },
            async {
                // First refresh is done, second still in flight
                tokio::time::sleep(Duration::from_millis(250)).await;
                feed.is_loading()
            },
        );

        assert!(loading_midway);
        assert!(!feed.is_loading());
    }
}
