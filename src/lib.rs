//! chatsync - local chat history with encrypted archive backup
//!
//! This library keeps chat sessions in a local key-value store and mirrors
//! them, encrypted with the owner's address, into a content-addressed
//! archive.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: Local store of sessions, the CID side table and the sync hook
//! - `crypto`: AES-256-GCM encryption keyed from the owner address
//! - `archive`: Archive client trait, HTTP and in-memory clients, retry
//! - `sync`: Debounced, periodic and forced uploads; restore and pull
//! - `transfer`: JSON import and export
//! - `config`: Configuration management and validation
//! - `credentials`: Archive API key in the OS keyring
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use chatsync::archive::InMemoryArchive;
//! use chatsync::config::{CryptoConfig, SyncConfig};
//! use chatsync::crypto::SessionCipher;
//! use chatsync::storage::{ChatMessage, ChatSession, LocalStore};
//! use chatsync::SyncManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(LocalStore::in_memory());
//!     let manager = SyncManager::new(
//!         store.clone(),
//!         Arc::new(InMemoryArchive::new()),
//!         Arc::new(SessionCipher::new(CryptoConfig::default())),
//!         SyncConfig::default(),
//!     );
//!     manager.start();
//!
//!     let mut chat = ChatSession::new("Groceries").owned_by("0xabc");
//!     chat.push_message(ChatMessage::user("milk"));
//!     let saved = store.save(chat, true);
//!
//!     let outcome = manager.force_sync(&saved.id).await?;
//!     println!("archived as {}", outcome.cid);
//!     manager.stop();
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod sync;
pub mod transfer;

// Re-export commonly used types
pub use archive::{ArchiveClient, Cid};
pub use config::Config;
pub use error::{ChatSyncError, Result};
pub use storage::{ChatMessage, ChatSession, LocalStore};
pub use sync::{SyncEvent, SyncManager};
