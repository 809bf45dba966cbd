//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionManager`: the login/signup/logout state machine and sole owner
//!   of the current identity
//! - `CredentialStore`: bearer token persistence in a session tier and a
//!   persistent tier (file or OS keychain)
//!
//! A stored token is validated against the profile endpoint at start-up;
//! any failure there logs the session out.

pub mod credentials;
pub mod session;

pub use credentials::{
    Credential, CredentialStore, FileTier, KeyringTier, LifetimeTier, MemoryTier, TokenTier,
};
pub use session::{SessionError, SessionManager, SessionSnapshot, SessionState};
