use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::models::{BookId, FavoriteRecord};
use crate::notify::Notifier;

use super::FavoriteStatus;

const MSG_LOAD_FAILED: &str = "Failed to load favorites";
const MSG_LOGIN_TO_ADD: &str = "Please login to add favorites";
const MSG_LOGIN_TO_MANAGE: &str = "Please login to manage favorites";
const MSG_ADDED: &str = "Added to favorites";
const MSG_ADD_FAILED: &str = "Failed to add to favorites";
const MSG_REMOVED: &str = "Removed from favorites";
const MSG_REMOVE_FAILED: &str = "Failed to remove from favorites";

/// How local state follows a successful add/remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reconcile {
    /// Patch the one affected id locally
    #[default]
    Optimistic,
    /// Re-fetch the whole set from the server
    ServerConfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Add,
    Remove,
}

#[derive(Default)]
struct FavoritesState {
    ids: HashSet<BookId>,
    records: Vec<FavoriteRecord>,
    /// Refreshes in flight
    pending: usize,
    error: Option<String>,
}

pub struct FavoritesSync {
    session: Arc<SessionManager>,
    notifier: Arc<dyn Notifier>,
    reconcile: Reconcile,
    state: Mutex<FavoritesState>,
}

impl FavoritesSync {
    pub fn new(session: Arc<SessionManager>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Self::with_reconcile(session, notifier, Reconcile::Optimistic)
    }

    pub fn with_reconcile(
        session: Arc<SessionManager>,
        notifier: Arc<dyn Notifier>,
        reconcile: Reconcile,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            notifier,
            reconcile,
            state: Mutex::new(FavoritesState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FavoritesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_user_id(&self) -> Option<i64> {
        self.session.snapshot().user_id()
    }

    /// Refresh on every identity change, starting with the current one.
    ///
    /// The task stops once this synchronizer is dropped or the session goes
    /// away.
    pub fn follow_session(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut rx = self.session.subscribe();
        tokio::spawn(async move {
            let mut current = rx.borrow_and_update().user_id();
            let Some(this) = weak.upgrade() else { return };
            this.refresh().await;
            drop(this);

            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().user_id();
                if next == current {
                    continue;
                }
                debug!(?current, ?next, "Identity changed, refreshing favorites");
                current = next;
                let Some(this) = weak.upgrade() else { break };
                this.refresh().await;
            }
        })
    }

    // ===== Reads =====

    pub fn is_favorite(&self, book_id: BookId) -> bool {
        self.lock().ids.contains(&book_id)
    }

    /// Favorite ids, sorted
    pub fn favorite_ids(&self) -> Vec<BookId> {
        let mut ids: Vec<BookId> = self.lock().ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Records from the last successful fetch, minus removed books
    pub fn records(&self) -> Vec<FavoriteRecord> {
        self.lock().records.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().pending > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    // ===== Operations =====

    fn reset(&self) {
        let mut state = self.lock();
        state.ids.clear();
        state.records.clear();
        state.error = None;
    }

    /// Replace the local set with the server's favorites for the current
    /// identity, or empty it when nobody is logged in.
    ///
    /// Concurrent refreshes are not ordered: the last response to arrive
    /// wins. A response for an identity that is no longer current is
    /// discarded.
    pub async fn refresh(&self) {
        let Some(user_id) = self.current_user_id() else {
            self.reset();
            return;
        };

        self.lock().pending += 1;
        let result = self.session.api().fetch_favorites(user_id).await;

        let failed = {
            let mut state = self.lock();
            state.pending = state.pending.saturating_sub(1);

            if self.current_user_id() != Some(user_id) {
                debug!(user_id, "Identity changed during favorites fetch, discarding");
                return;
            }

            match result {
                Ok(records) => {
                    state.ids = records.iter().map(|r| r.book_id).collect();
                    state.records = records;
                    state.error = None;
                    debug!(user_id, count = state.ids.len(), "Favorites replaced");
                    false
                }
                Err(e) => {
                    warn!(user_id, error = %e, "Error fetching favorites");
                    state.error = Some(MSG_LOAD_FAILED.to_string());
                    true
                }
            }
        };

        if failed {
            self.notifier.error(MSG_LOAD_FAILED);
        }
    }

    pub async fn add(&self, book_id: BookId) -> bool {
        self.mutate(book_id, Mutation::Add).await
    }

    pub async fn remove(&self, book_id: BookId) -> bool {
        self.mutate(book_id, Mutation::Remove).await
    }

    async fn mutate(&self, book_id: BookId, mutation: Mutation) -> bool {
        let Some(user_id) = self.current_user_id() else {
            self.notifier.error(match mutation {
                Mutation::Add => MSG_LOGIN_TO_ADD,
                Mutation::Remove => MSG_LOGIN_TO_MANAGE,
            });
            return false;
        };

        let api = self.session.api();
        let result = match mutation {
            Mutation::Add => api.add_favorite(user_id, book_id).await,
            Mutation::Remove => api.remove_favorite(user_id, book_id).await,
        };

        if let Err(e) = result {
            warn!(user_id, %book_id, ?mutation, error = %e, "Favorite update failed");
            self.notifier.error(match mutation {
                Mutation::Add => MSG_ADD_FAILED,
                Mutation::Remove => MSG_REMOVE_FAILED,
            });
            return false;
        }

        match self.reconcile {
            Reconcile::Optimistic => self.patch(user_id, book_id, mutation),
            Reconcile::ServerConfirmed => self.refresh().await,
        }

        self.notifier.success(match mutation {
            Mutation::Add => MSG_ADDED,
            Mutation::Remove => MSG_REMOVED,
        });
        true
    }

    fn patch(&self, user_id: i64, book_id: BookId, mutation: Mutation) {
        if self.current_user_id() != Some(user_id) {
            return;
        }
        let mut state = self.lock();
        match mutation {
            Mutation::Add => {
                state.ids.insert(book_id);
            }
            Mutation::Remove => {
                state.ids.remove(&book_id);
                state.records.retain(|r| r.book_id != book_id);
            }
        }
    }
}

impl FavoriteStatus for FavoritesSync {
    fn is_favorite(&self, book_id: BookId) -> bool {
        FavoritesSync::is_favorite(self, book_id)
    }

    fn refresh(&self) -> impl Future<Output = ()> + Send {
        FavoritesSync::refresh(self)
    }

    fn add(&self, book_id: BookId) -> impl Future<Output = bool> + Send {
        FavoritesSync::add(self, book_id)
    }

    fn remove(&self, book_id: BookId) -> impl Future<Output = bool> + Send {
        FavoritesSync::remove(self, book_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::ApiClient;
    use crate::auth::CredentialStore;
    use crate::notify::{Level, RecordingNotifier};

    async fn logged_in(server: &MockServer, user_id: i64) -> Arc<SessionManager> {
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"token": "tok", "user": {"id": user_id, "name": "Ada", "email": "a@example.com"}}
            })))
            .mount(server)
            .await;
        let api = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let session = SessionManager::new(api, CredentialStore::in_memory());
        session.login("a@example.com", "pw", false).await.unwrap();
        session
    }

    fn favorites_body(ids: &[i64]) -> serde_json::Value {
        let data: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": 100 + id, "bookId": id, "title": format!("Book {}", id)}))
            .collect();
        json!({"success": true, "data": data})
    }

    #[tokio::test]
    async fn test_refresh_replaces_set_and_records() {
        let server = MockServer::start().await;
        let session = logged_in(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/users/1/favorites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(favorites_body(&[3, 5])))
            .mount(&server)
            .await;

        let fav = FavoritesSync::new(session, Arc::new(RecordingNotifier::new()));
        fav.refresh().await;

        assert_eq!(fav.favorite_ids(), vec![BookId(3), BookId(5)]);
        assert_eq!(fav.records().len(), 2);
        assert!(!fav.is_loading());
        assert!(fav.last_error().is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_set_and_notifies() {
        let server = MockServer::start().await;
        let session = logged_in(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/api/users/1/favorites"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/users/1/favorites/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let notifier = Arc::new(RecordingNotifier::new());
        let fav = FavoritesSync::new(session, notifier.clone());
        assert!(fav.add(BookId(9)).await);

        fav.refresh().await;
        assert!(fav.is_favorite(BookId(9)));
        assert_eq!(fav.last_error().as_deref(), Some(MSG_LOAD_FAILED));
        assert_eq!(notifier.messages(Level::Error), vec![MSG_LOAD_FAILED]);
    }

    #[tokio::test]
    async fn test_remove_drops_record() {
        let server = MockServer::start().await;
        let session = logged_in(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/api/users/2/favorites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(favorites_body(&[1, 2])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/users/2/favorites/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let notifier = Arc::new(RecordingNotifier::new());
        let fav = FavoritesSync::new(session, notifier.clone());
        fav.refresh().await;

        assert!(fav.remove(BookId(1)).await);
        assert!(!fav.is_favorite(BookId(1)));
        assert_eq!(fav.records().len(), 1);
        assert_eq!(fav.records()[0].book_id, BookId(2));
        assert_eq!(notifier.messages(Level::Success), vec![MSG_REMOVED]);
    }

    #[tokio::test]
    async fn test_server_confirmed_refetches_after_add() {
        let server = MockServer::start().await;
        let session = logged_in(&server, 4).await;
        Mock::given(method("POST"))
            .and(path("/api/users/4/favorites/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;
        // Server does not list the new favorite yet: local state follows it
        Mock::given(method("GET"))
            .and(path("/api/users/4/favorites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(favorites_body(&[1])))
            .expect(1)
            .mount(&server)
            .await;

        let fav = FavoritesSync::with_reconcile(
            session,
            Arc::new(RecordingNotifier::new()),
            Reconcile::ServerConfirmed,
        );
        assert!(fav.add(BookId(7)).await);
        assert!(!fav.is_favorite(BookId(7)));
        assert!(fav.is_favorite(BookId(1)));
    }

    #[tokio::test]
    async fn test_remove_without_identity() {
        let server = MockServer::start().await;
        let api = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let session = SessionManager::new(api, CredentialStore::in_memory());
        session.initialize().await;

        let notifier = Arc::new(RecordingNotifier::new());
        let fav = FavoritesSync::new(session, notifier.clone());
        assert!(!fav.remove(BookId(1)).await);
        assert_eq!(notifier.messages(Level::Error), vec![MSG_LOGIN_TO_MANAGE]);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
