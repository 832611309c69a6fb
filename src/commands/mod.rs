/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `chats`: Local chat browsing, editing, import and export
- `archive`: Sync, restore, pull and the long-running watch loop
- `auth`: Archive credential management
*/

use crate::archive::{HttpArchiveClient, RetryPolicy, RetryingArchive};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::crypto::SessionCipher;
use crate::error::{ChatSyncError, Result};
use crate::storage::{ChatSession, LocalStore};
use crate::sync::SyncManager;
use std::sync::Arc;

pub mod archive;
pub mod chats;

/// Everything a command handler needs
pub struct Context {
    /// Effective configuration
    pub config: Config,
    /// Opened local store
    pub store: Arc<LocalStore>,
}

impl Context {
    /// Open the store named by `config`
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be opened
    pub fn open(config: Config) -> Result<Self> {
        let path = config.storage.resolve_path()?;
        tracing::debug!("Opening local store at {}", path.display());
        let store = Arc::new(LocalStore::open(&path)?);
        Ok(Self { config, store })
    }

    /// Build a sync manager over the configured HTTP archive
    ///
    /// The credential is resolved from config, then the keyring. A missing
    /// credential is not an error here; uploads fail with
    /// `MissingCredentials` instead.
    pub fn sync_manager(&self) -> Result<SyncManager> {
        let api_key = CredentialStore
            .resolve(&self.config.archive)
            .map(|(key, _)| key);
        let http = HttpArchiveClient::new(&self.config.archive, api_key)?;
        let archive = RetryingArchive::new(http, RetryPolicy::from(&self.config.archive.retry));
        let cipher = SessionCipher::new(self.config.crypto.clone());

        let manager = SyncManager::new(
            Arc::clone(&self.store),
            Arc::new(archive),
            Arc::new(cipher),
            self.config.sync.clone(),
        );
        manager.set_identity(self.config.address().as_deref());
        Ok(manager)
    }

    /// The configured owner address
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Config` when no address is set
    pub fn require_address(&self) -> Result<String> {
        self.config.address().ok_or_else(|| {
            ChatSyncError::Config(
                "no address configured; pass --address or set CHATSYNC_ADDRESS".to_string(),
            )
            .into()
        })
    }

    /// Find a chat by full id or unique id prefix
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches and `Validation` when the
    /// prefix is ambiguous
    pub fn resolve_chat(&self, id: &str) -> Result<ChatSession> {
        if let Some(session) = self.store.get_by_id(id) {
            return Ok(session);
        }
        let mut matches = self.store.find_by_prefix(id);
        match matches.len() {
            0 => Err(ChatSyncError::NotFound(format!("chat {}", id)).into()),
            1 => Ok(matches.remove(0)),
            n => Err(ChatSyncError::Validation(format!(
                "id prefix {} matches {} chats",
                id, n
            ))
            .into()),
        }
    }
}

pub mod auth {
    //! Archive credential management.
    //!
    //! Keys are stored in the OS keyring per archive endpoint; a key in the
    //! config file or environment takes precedence.

    use super::*;
    use crate::cli::AuthCommand;
    use crate::credentials::{ArchiveCredential, CredentialSource};
    use colored::Colorize;

    /// Handle `auth` subcommands
    pub fn handle_auth(ctx: &Context, command: AuthCommand) -> Result<()> {
        let api_base = &ctx.config.archive.api_base;
        match command {
            AuthCommand::Set { key } => {
                if key.trim().is_empty() {
                    return Err(
                        ChatSyncError::Validation("API key cannot be empty".to_string()).into(),
                    );
                }
                let credential = ArchiveCredential::new(key.trim());
                CredentialStore.save(api_base, &credential)?;
                println!(
                    "{} {} for {}",
                    "Stored API key".green(),
                    credential.masked(),
                    api_base.cyan()
                );
            }
            AuthCommand::Clear => {
                CredentialStore.delete(api_base)?;
                println!("{} for {}", "Removed stored API key".green(), api_base.cyan());
            }
            AuthCommand::Status => match CredentialStore.resolve(&ctx.config.archive) {
                Some((key, source)) => {
                    let from = match source {
                        CredentialSource::Config => "configuration",
                        CredentialSource::Keyring => "OS keyring",
                    };
                    println!(
                        "Using API key {} from {} for {}",
                        ArchiveCredential::new(key).masked(),
                        from,
                        api_base.cyan()
                    );
                }
                None => {
                    println!(
                        "{} Run {} to store one.",
                        "No API key configured.".yellow(),
                        "chatsync auth set <KEY>".cyan()
                    );
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        let mut config = Config::default();
        config.storage.path = Some(dir.path().join("store").to_string_lossy().to_string());
        Context::open(config).unwrap()
    }

    #[test]
    fn test_resolve_chat_by_prefix() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.store.save(ChatSession::with_id("abc123", "One"), false);
        ctx.store.save(ChatSession::with_id("abd456", "Two"), false);

        assert_eq!(ctx.resolve_chat("abc").unwrap().id, "abc123");
        assert_eq!(ctx.resolve_chat("abd456").unwrap().id, "abd456");

        let ambiguous = ctx.resolve_chat("ab").unwrap_err();
        assert!(matches!(
            ambiguous.downcast_ref::<ChatSyncError>(),
            Some(ChatSyncError::Validation(_))
        ));
        let missing = ctx.resolve_chat("zzz").unwrap_err();
        assert!(matches!(
            missing.downcast_ref::<ChatSyncError>(),
            Some(ChatSyncError::NotFound(_))
        ));
    }

    #[test]
    fn test_require_address() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        assert!(ctx.require_address().is_err());
        ctx.config.identity.address = Some("0xABC".to_string());
        assert_eq!(ctx.require_address().unwrap(), "0xabc");
    }

    #[tokio::test]
    async fn test_sync_manager_carries_identity() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.config.identity.address = Some("0xABC".to_string());
        ctx.config.archive.api_key = Some("key".to_string());
        let manager = ctx.sync_manager().unwrap();
        assert_eq!(manager.identity().as_deref(), Some("0xabc"));
    }
}
