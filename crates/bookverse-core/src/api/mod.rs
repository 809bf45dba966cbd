//! REST API client module for the BookVerse service.
//!
//! This module provides the `ApiClient` for the authentication, favorites,
//! and review feed endpoints, and the `RequestAuthenticator` that attaches
//! the bearer token to every request.
//!
//! All responses are wrapped in `{ success, data, message }`; a
//! `success: false` envelope surfaces as `ApiError::Rejected`.

pub mod authenticator;
pub mod client;
pub mod error;

pub use authenticator::{RequestAuthenticator, UnauthorizedObserver};
pub use client::{ApiClient, ApiResult, REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
