//! Data models for BookVerse API payloads.
//!
//! This module contains the data structures exchanged with the BookVerse
//! API:
//!
//! - `User`: the authenticated identity returned by login/signup/profile
//! - `FavoriteRecord`, `BookId`: favorite catalog entries
//! - `RecentReview`: entries of the home page review feed
//! - `Envelope`, `Page`: the response wrappers every endpoint uses

pub mod envelope;
pub mod favorite;
pub mod review;
pub mod user;

pub use envelope::{AuthPayload, Envelope, Page, Pagination};
pub use favorite::{BookId, FavoriteRecord};
pub use review::RecentReview;
pub use user::User;
