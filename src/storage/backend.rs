//! Key-value backends for the local chat store
//!
//! The store keeps a handful of top-level string documents. Anything that can
//! get, set and remove a string by key can back it: an embedded `sled` tree
//! on disk, or a plain map in memory for tests.

use crate::error::{ChatSyncError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Synchronous string key-value store
pub trait KvBackend: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Durable backend on an embedded `sled` database
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    /// Open or create the database directory at `path`
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Storage` if the database cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatSyncError::Storage(format!("Failed to create data directory: {}", e))
            })?;
        }
        let db = sled::open(path)
            .map_err(|e| ChatSyncError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }
}

impl KvBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| ChatSyncError::Storage(format!("Get failed: {}", e)))?;
        match value {
            Some(bytes) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ChatSyncError::Storage(format!("Value for '{}' is not UTF-8: {}", key, e))
                })?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| ChatSyncError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| ChatSyncError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| ChatSyncError::Storage(format!("Remove failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| ChatSyncError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory backend with an optional byte quota
///
/// The quota counts key and value bytes across all entries, which is how
/// browser storage quotas behave closely enough to exercise the
/// quota-exceeded path.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    /// Create an unbounded backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that rejects writes pushing usage past `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Raw value for `key`, bypassing the store
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(ChatSyncError::Storage(format!(
                    "quota exceeded: {} of {} bytes",
                    needed, quota
                ))
                .into());
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sled_backend_set_get_remove() {
        let dir = tempdir().expect("failed to create tempdir");
        let backend = SledBackend::open(dir.path().join("store")).expect("open failed");

        assert!(backend.get("chats").unwrap().is_none());
        backend.set("chats", "[]").unwrap();
        assert_eq!(backend.get("chats").unwrap().as_deref(), Some("[]"));
        backend.remove("chats").unwrap();
        assert!(backend.get("chats").unwrap().is_none());
    }

    #[test]
    fn test_memory_backend_quota_rejects_oversized_write() {
        let backend = MemoryBackend::with_quota(16);
        backend.set("k", "small").unwrap();
        let err = backend.set("k2", "this value is far too large").unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(backend.get("k2").unwrap().is_none());
    }

    #[test]
    fn test_memory_backend_quota_counts_replacement_once() {
        let backend = MemoryBackend::with_quota(10);
        backend.set("k", "12345678").unwrap();
        // Replacing the same key must not count the old value.
        backend.set("k", "87654321").unwrap();
        assert_eq!(backend.raw("k").as_deref(), Some("87654321"));
    }
}
