//! Core library for the BookVerse client.
//!
//! - `api`: HTTP client and the bearer-token request authenticator
//! - `auth`: session state machine and two-tier credential store
//! - `favorites`: local mirror of the user's favorite books
//! - `reviews`: recent reviews feed
//! - `notify`: user-facing notifications
//! - `config`: configuration file and environment handling

pub mod api;
pub mod auth;
pub mod config;
pub mod favorites;
pub mod models;
pub mod notify;
pub mod reviews;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, SessionManager, SessionSnapshot, SessionState};
pub use config::Config;
pub use favorites::{FavoriteStatus, FavoritesSync};
pub use models::{BookId, User};
pub use notify::{Notifier, RecordingNotifier, TracingNotifier};
