//! Archive credential persistence via OS keyring
//!
//! The archive API key is stored in the operating system's credential store
//! (Keychain on macOS, Secret Service on Linux, Windows Credential Manager on
//! Windows) under the service `chatsync-archive`, one entry per archive
//! endpoint. The key is serialized to JSON together with the time it was
//! saved.
//!
//! A key set in the configuration file or `CHATSYNC_ARCHIVE_API_KEY` always
//! wins over the keyring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ArchiveConfig;
use crate::error::{ChatSyncError, Result};

/// Keyring service name for archive credentials
pub const SERVICE_NAME: &str = "chatsync-archive";

/// A stored archive credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveCredential {
    /// Bearer token sent to the archive
    pub api_key: String,

    /// When the credential was saved
    pub saved_at: DateTime<Utc>,
}

impl ArchiveCredential {
    /// Create a credential stamped with the current time
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            saved_at: Utc::now(),
        }
    }

    /// Key with everything but the last four characters hidden
    ///
    /// # Examples
    ///
    /// ```
    /// use chatsync::credentials::ArchiveCredential;
    ///
    /// let credential = ArchiveCredential::new("sk-1234567890");
    /// assert_eq!(credential.masked(), "*********7890");
    /// ```
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let tail: String = chars[hidden..].iter().collect();
        format!("{}{}", "*".repeat(hidden), tail)
    }
}

/// Where the effective API key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Configuration file or environment
    Config,
    /// OS keyring
    Keyring,
}

/// Stateless accessor for archive credentials in the OS keyring
///
/// # Examples
///
/// ```no_run
/// use chatsync::credentials::{ArchiveCredential, CredentialStore};
///
/// # fn example() -> chatsync::error::Result<()> {
/// let store = CredentialStore;
/// store.save("http://127.0.0.1:8080/api/v1", &ArchiveCredential::new("secret"))?;
/// assert!(store.load("http://127.0.0.1:8080/api/v1")?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct CredentialStore;

impl CredentialStore {
    fn account(api_base: &str) -> String {
        api_base.trim().trim_end_matches('/').to_lowercase()
    }

    fn entry(api_base: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, &Self::account(api_base))
            .map_err(|e| ChatSyncError::Keyring(e).into())
    }

    /// Persist a credential for the archive at `api_base`
    ///
    /// # Errors
    ///
    /// Returns [`ChatSyncError::Keyring`] if the OS credential store rejects
    /// the write.
    pub fn save(&self, api_base: &str, credential: &ArchiveCredential) -> Result<()> {
        let json = serde_json::to_string(credential)?;
        Self::entry(api_base)?
            .set_password(&json)
            .map_err(ChatSyncError::Keyring)?;
        tracing::debug!("Stored archive credential for {}", Self::account(api_base));
        Ok(())
    }

    /// Load the credential for `api_base`; `Ok(None)` when none is stored
    pub fn load(&self, api_base: &str) -> Result<Option<ArchiveCredential>> {
        match Self::entry(api_base)?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ChatSyncError::Keyring(e).into()),
        }
    }

    /// Remove the stored credential; a no-op when none exists
    pub fn delete(&self, api_base: &str) -> Result<()> {
        match Self::entry(api_base)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ChatSyncError::Keyring(e).into()),
        }
    }

    /// Effective API key for `config`
    ///
    /// The configured key is used when present. Otherwise the keyring is
    /// consulted; keyring failures are logged and treated as "no key" so a
    /// machine without a credential store still runs local commands.
    pub fn resolve(&self, config: &ArchiveConfig) -> Option<(String, CredentialSource)> {
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Some((key.to_string(), CredentialSource::Config));
        }
        match self.load(&config.api_base) {
            Ok(found) => found.map(|c| (c.api_key, CredentialSource::Keyring)),
            Err(e) => {
                tracing::debug!("Keyring lookup failed: {}", e);
                None
            }
        }
    }
}
