//! Favorite books of the logged-in user.
//!
//! `FavoritesSync` mirrors the server's favorite set locally. It is rebuilt
//! from the server whenever the identity changes and patched one element at
//! a time after each successful add/remove.
//!
//! Callers that only need the operations should depend on `FavoriteStatus`
//! so a stricter implementation can be swapped in.

pub mod sync;

use std::future::Future;

use crate::models::BookId;

pub use sync::{FavoritesSync, Reconcile};

/// Favorite status operations as seen by front ends.
///
/// Mutations report success as `bool`; failures are surfaced through the
/// notifier, never as errors.
pub trait FavoriteStatus: Send + Sync {
    /// Local membership check. Never touches the network.
    fn is_favorite(&self, book_id: BookId) -> bool;

    fn refresh(&self) -> impl Future<Output = ()> + Send;

    fn add(&self, book_id: BookId) -> impl Future<Output = bool> + Send;

    fn remove(&self, book_id: BookId) -> impl Future<Output = bool> + Send;

    /// Flip the favorite status based on the local set.
    ///
    /// The direction comes from local state, so a stale set can pick the
    /// wrong direction until the next `refresh`.
    fn toggle(&self, book_id: BookId) -> impl Future<Output = bool> + Send {
        async move {
            if self.is_favorite(book_id) {
                self.remove(book_id).await
            } else {
                self.add(book_id).await
            }
        }
    }
}
