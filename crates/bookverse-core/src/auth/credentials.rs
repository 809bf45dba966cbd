//! Bearer token persistence in two lifetime tiers.
//!
//! The persistent tier survives restarts (a JSON file in the data directory,
//! or the OS keychain). The session tier lives only as long as the user's
//! login session: a file under the XDG runtime directory where one exists,
//! otherwise process memory.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, CredentialBackend, APP_NAME};

/// Credential file name inside the tier's directory
const CREDENTIAL_FILE: &str = "credential.json";

/// Keychain account the token is stored under
const KEYRING_ACCOUNT: &str = "bearer-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeTier {
    /// Cleared when the user session ends
    Session,
    /// Survives restarts
    Persistent,
}

impl LifetimeTier {
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            LifetimeTier::Persistent
        } else {
            LifetimeTier::Session
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub tier: LifetimeTier,
}

/// One storage scope for the token.
pub trait TokenTier: Send + Sync {
    fn get(&self) -> Result<Option<String>>;
    fn set(&self, token: &str) -> Result<()>;
    /// Remove the token. Removing from an empty tier succeeds.
    fn remove(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    saved_at: DateTime<Utc>,
}

/// Token kept in a JSON file.
pub struct FileTier {
    path: PathBuf,
}

impl FileTier {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenTier for FileTier {
    fn get(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read credential file")?;
        let stored: StoredToken = serde_json::from_str(&contents)
            .context("Failed to parse credential file")?;
        Ok(Some(stored.token))
    }

    fn set(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create credential directory")?;
        }
        let stored = StoredToken {
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        std::fs::write(&self.path, contents).context("Failed to write credential file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict credential file permissions")?;
        }
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove credential file"),
        }
    }
}

/// Token kept in process memory.
#[derive(Default)]
pub struct MemoryTier {
    token: Mutex<Option<String>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenTier for MemoryTier {
    fn get(&self) -> Result<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

/// Token kept in the OS keychain. One entry is held for the tier's lifetime.
pub struct KeyringTier {
    entry: Entry,
}

impl KeyringTier {
    pub fn new(service: &str) -> Result<Self> {
        let entry =
            Entry::new(service, KEYRING_ACCOUNT).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl TokenTier for KeyringTier {
    fn get(&self) -> Result<Option<String>> {
        match self.entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn set(&self, token: &str) -> Result<()> {
        self.entry
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    fn remove(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

/// Two-tier token store. Only the session manager writes to it.
pub struct CredentialStore {
    persistent: Box<dyn TokenTier>,
    session: Box<dyn TokenTier>,
}

impl CredentialStore {
    pub fn new(persistent: Box<dyn TokenTier>, session: Box<dyn TokenTier>) -> Self {
        Self { persistent, session }
    }

    /// Store backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryTier::new()), Box::new(MemoryTier::new()))
    }

    /// Build the store described by the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let persistent: Box<dyn TokenTier> = match config.credential_backend {
            CredentialBackend::File => Box::new(FileTier::new(config.data_dir()?)),
            CredentialBackend::Keyring => Box::new(KeyringTier::new(APP_NAME)?),
        };

        let session: Box<dyn TokenTier> = match dirs::runtime_dir() {
            Some(dir) => Box::new(FileTier::new(dir.join(APP_NAME))),
            None => {
                debug!("No runtime directory, session tokens live in memory");
                Box::new(MemoryTier::new())
            }
        };

        Ok(Self::new(persistent, session))
    }

    fn tier(&self, tier: LifetimeTier) -> &dyn TokenTier {
        match tier {
            LifetimeTier::Persistent => self.persistent.as_ref(),
            LifetimeTier::Session => self.session.as_ref(),
        }
    }

    /// Drop any token held by the other tier, then write the token into the
    /// tier picked by `remember`. If the other tier cannot be emptied nothing
    /// is written, so at most one tier ever holds a token.
    pub fn save(&self, token: &str, remember: bool) -> Result<()> {
        let target = LifetimeTier::from_remember(remember);
        let other = match target {
            LifetimeTier::Persistent => LifetimeTier::Session,
            LifetimeTier::Session => LifetimeTier::Persistent,
        };
        self.tier(other)
            .remove()
            .with_context(|| format!("Failed to clear {other:?} tier"))?;
        self.tier(target).set(token)?;
        debug!(tier = ?target, "Credential saved");
        Ok(())
    }

    /// Current credential. The persistent tier wins when both hold a token.
    /// An unreadable tier is logged and treated as empty.
    pub fn load(&self) -> Option<Credential> {
        for tier in [LifetimeTier::Persistent, LifetimeTier::Session] {
            match self.tier(tier).get() {
                Ok(Some(token)) => return Some(Credential { token, tier }),
                Ok(None) => {}
                Err(e) => warn!(tier = ?tier, error = %e, "Failed to read stored credential"),
            }
        }
        None
    }

    /// Remove the token from both tiers. Never fails; errors are logged.
    pub fn clear(&self) {
        for tier in [LifetimeTier::Persistent, LifetimeTier::Session] {
            if let Err(e) = self.tier(tier).remove() {
                warn!(tier = ?tier, error = %e, "Failed to remove stored credential");
            }
        }
    }

    /// Write directly into one tier, leaving the other alone
    pub fn put_raw(&self, tier: LifetimeTier, token: &str) -> Result<()> {
        self.tier(tier).set(token)
    }
}
