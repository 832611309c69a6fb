//! Local chat store
//!
//! Keeps every chat session and the session-to-CID side table in three
//! top-level JSON documents of a synchronous key-value backend:
//!
//! - `chats`: array of [`ChatSession`]
//! - `chat_cids`: map of session id to [`CidRecord`]
//! - `last_sync`: epoch milliseconds of the last completed sweep
//!
//! Reads fail open: a missing or unparsable document reads as empty. Writes
//! that fail (quota, serialization) are logged and dropped, so callers keep
//! working with their in-memory copy.

use crate::error::{ChatSyncError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub mod backend;
pub mod types;

pub use backend::{KvBackend, MemoryBackend, SledBackend};
pub use types::{now_millis, ChatMessage, ChatSession, CidRecord, Role};

/// Key of the sessions document
pub const CHATS_KEY: &str = "chats";
/// Key of the CID side table
pub const CIDS_KEY: &str = "chat_cids";
/// Key of the last-sync timestamp
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Receives save and delete notifications from the store
///
/// The sync manager installs one of these so that `save(.., true)` arms a
/// debounced upload and `delete` cancels it.
pub trait SyncHook: Send + Sync {
    /// A session was saved and wants a remote upload
    fn schedule(&self, session: ChatSession);

    /// A session was deleted; drop any pending upload for it
    fn cancel(&self, id: &str);
}

/// Default on-disk location of the store
///
/// # Errors
///
/// Returns `ChatSyncError::Storage` if no data directory can be determined
pub fn default_store_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("io", "chatsync", "chatsync")
        .ok_or_else(|| ChatSyncError::Storage("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().join("store"))
}

/// Synchronous local cache of chat sessions
pub struct LocalStore {
    backend: Arc<dyn KvBackend>,
    hook: RwLock<Option<Arc<dyn SyncHook>>>,
    // Serializes read-modify-write cycles on the documents.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open a durable store at `path`
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Storage` if the database cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = SledBackend::open(path)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Create a store that lives only in memory
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Create a store on any backend
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            hook: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Install the sync hook, replacing any previous one
    pub fn attach_sync(&self, hook: Arc<dyn SyncHook>) {
        *self.hook.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Remove the sync hook
    pub fn detach_sync(&self) {
        *self.hook.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// All sessions in stored order; empty on missing or malformed data
    pub fn get_all(&self) -> Vec<ChatSession> {
        self.read_doc(CHATS_KEY)
    }

    /// Session with the given id
    pub fn get_by_id(&self, id: &str) -> Option<ChatSession> {
        self.get_all().into_iter().find(|s| s.id == id)
    }

    /// Sessions whose id starts with `prefix`
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<ChatSession> {
        self.get_all()
            .into_iter()
            .filter(|s| s.id.starts_with(prefix))
            .collect()
    }

    /// Upsert a session by id
    ///
    /// Stamps `updated_at` with the current time and bumps `revision` past
    /// the stored one. When `trigger_remote_sync` is set and a sync hook is
    /// attached, a debounced upload is armed. A failed write is logged and
    /// the stamped session is still returned.
    pub fn save(&self, mut session: ChatSession, trigger_remote_sync: bool) -> ChatSession {
        {
            let _guard = self.guard();
            let mut chats: Vec<ChatSession> = self.read_doc(CHATS_KEY);

            let stored_revision = chats
                .iter()
                .find(|s| s.id == session.id)
                .map(|s| s.revision)
                .unwrap_or(0);
            session.revision = stored_revision.max(session.revision) + 1;
            session.updated_at = now_millis().max(session.created_at);

            match chats.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => *existing = session.clone(),
                None => chats.push(session.clone()),
            }

            if let Err(e) = self.write_doc(CHATS_KEY, &chats) {
                tracing::warn!("Failed to persist chat {}: {}", session.id, e);
            }
        }

        if trigger_remote_sync {
            if let Some(hook) = self.current_hook() {
                hook.schedule(session.clone());
            }
        }

        session
    }

    /// Remove a session, its CID entry and any pending upload timer
    ///
    /// Returns `true` if a session was removed. The archived blob is
    /// immutable and stays where it is.
    pub fn delete(&self, id: &str) -> bool {
        let removed = {
            let _guard = self.guard();
            let mut chats: Vec<ChatSession> = self.read_doc(CHATS_KEY);
            let before = chats.len();
            chats.retain(|s| s.id != id);
            let removed = chats.len() != before;
            if removed {
                if let Err(e) = self.write_doc(CHATS_KEY, &chats) {
                    tracing::warn!("Failed to persist deletion of chat {}: {}", id, e);
                }
            }

            let mut cids: BTreeMap<String, CidRecord> = self.read_doc(CIDS_KEY);
            if cids.remove(id).is_some() {
                if let Err(e) = self.write_doc(CIDS_KEY, &cids) {
                    tracing::warn!("Failed to remove CID entry for chat {}: {}", id, e);
                }
            }
            removed
        };

        if let Some(hook) = self.current_hook() {
            hook.cancel(id);
        }

        removed
    }

    /// Remove every session and CID entry
    pub fn clear(&self) {
        let _guard = self.guard();
        for key in [CHATS_KEY, CIDS_KEY] {
            if let Err(e) = self.backend.remove(key) {
                tracing::warn!("Failed to clear {}: {}", key, e);
            }
        }
    }

    /// Write sessions as given, without stamping `updated_at`
    ///
    /// Used for imports and restores. A session replacing a stored one is
    /// moved past the stored revision, so uploads of the old content can no
    /// longer write their CID back. Sessions carrying a CID get a matching
    /// side-table entry at their final revision; any other entry for a
    /// written id is dropped. Returns the number of sessions written.
    pub fn put_many(&self, sessions: Vec<ChatSession>) -> usize {
        let _guard = self.guard();
        let mut chats: Vec<ChatSession> = self.read_doc(CHATS_KEY);
        let mut cids: BTreeMap<String, CidRecord> = self.read_doc(CIDS_KEY);
        let count = sessions.len();

        for mut session in sessions {
            let existing = chats.iter_mut().find(|s| s.id == session.id);
            if let Some(stored) = &existing {
                session.revision = session.revision.max(stored.revision + 1);
            }

            match &session.cid {
                Some(cid) => {
                    cids.insert(
                        session.id.clone(),
                        CidRecord {
                            cid: cid.clone(),
                            timestamp: now_millis(),
                            message_count: session.messages.len(),
                            revision: session.revision,
                        },
                    );
                }
                None => {
                    cids.remove(&session.id);
                }
            }

            match existing {
                Some(stored) => *stored = session,
                None => chats.push(session),
            }
        }

        if let Err(e) = self
            .write_doc(CHATS_KEY, &chats)
            .and_then(|_| self.write_doc(CIDS_KEY, &cids))
        {
            tracing::warn!("Failed to persist {} imported chats: {}", count, e);
            return 0;
        }
        count
    }

    /// Record the CID of a finished upload
    ///
    /// The CID is written to the session and the side table only if the
    /// session still exists and its revision has not moved past
    /// `uploaded_revision`. Neither `updated_at` nor `revision` change.
    /// Returns `true` when the CID was recorded.
    pub fn record_cid(
        &self,
        id: &str,
        cid: &str,
        uploaded_revision: u64,
        message_count: usize,
    ) -> bool {
        let _guard = self.guard();
        let mut chats: Vec<ChatSession> = self.read_doc(CHATS_KEY);

        let Some(session) = chats.iter_mut().find(|s| s.id == id) else {
            tracing::debug!("Chat {} no longer exists; dropping CID {}", id, cid);
            return false;
        };
        if session.revision > uploaded_revision {
            tracing::debug!(
                "Chat {} moved to revision {} while revision {} uploaded; dropping CID {}",
                id,
                session.revision,
                uploaded_revision,
                cid
            );
            return false;
        }
        session.cid = Some(cid.to_string());

        let mut cids: BTreeMap<String, CidRecord> = self.read_doc(CIDS_KEY);
        cids.insert(
            id.to_string(),
            CidRecord {
                cid: cid.to_string(),
                timestamp: now_millis(),
                message_count,
                revision: uploaded_revision,
            },
        );

        match self
            .write_doc(CHATS_KEY, &chats)
            .and_then(|_| self.write_doc(CIDS_KEY, &cids))
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to record CID for chat {}: {}", id, e);
                false
            }
        }
    }

    /// CID side-table entry for a session
    pub fn get_cid_for_chat(&self, id: &str) -> Option<CidRecord> {
        self.cid_table().remove(id)
    }

    /// The whole CID side table
    pub fn cid_table(&self) -> BTreeMap<String, CidRecord> {
        self.read_doc(CIDS_KEY)
    }

    /// Whether the session has local changes not covered by its CID
    pub fn needs_sync(&self, session: &ChatSession) -> bool {
        match self.get_cid_for_chat(&session.id) {
            Some(record) => record.revision < session.revision,
            None => true,
        }
    }

    /// Epoch milliseconds of the last completed sweep
    pub fn last_sync(&self) -> Option<i64> {
        self.backend
            .get(LAST_SYNC_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.trim().parse().ok())
    }

    /// Store the last-sync timestamp
    pub fn set_last_sync(&self, millis: i64) {
        if let Err(e) = self.backend.set(LAST_SYNC_KEY, &millis.to_string()) {
            tracing::warn!("Failed to store last sync time: {}", e);
        }
    }

    fn current_hook(&self) -> Option<Arc<dyn SyncHook>> {
        self.hook.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_doc<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", key, e);
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("Discarding malformed {} document: {}", key, e);
            T::default()
        })
    }

    fn write_doc<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| ChatSyncError::Storage(format!("Serialization failed: {}", e)))?;
        self.backend.set(key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session_with_message(id: &str, text: &str) -> ChatSession {
        let mut session = ChatSession::with_id(id, "Test chat");
        session.push_message(ChatMessage::user(text));
        session
    }

    #[derive(Default)]
    struct RecordingHook {
        scheduled: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl SyncHook for RecordingHook {
        fn schedule(&self, session: ChatSession) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scheduled.lock().unwrap().push(session.id);
        }

        fn cancel(&self, id: &str) {
            self.cancelled.lock().unwrap().push(id.to_string());
        }
    }

    #[test]
    fn test_get_all_is_empty_for_new_store() {
        let store = LocalStore::in_memory();
        assert!(store.get_all().is_empty());
        assert!(store.get_by_id("missing").is_none());
    }

    #[test]
    fn test_get_all_fails_open_on_malformed_document() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(CHATS_KEY, "{not json").unwrap();
        let store = LocalStore::with_backend(backend);
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_save_twice_keeps_one_record() {
        let store = LocalStore::in_memory();
        let session = session_with_message("s1", "hello");

        let first = store.save(session.clone(), false);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.save(session, false);

        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "s1");
        assert_eq!(all[0].updated_at, second.updated_at);
        assert!(second.updated_at >= first.updated_at);
        assert!(second.revision > first.revision);
    }

    #[test]
    fn test_save_preserves_insertion_order() {
        let store = LocalStore::in_memory();
        store.save(session_with_message("a", "1"), false);
        store.save(session_with_message("b", "2"), false);
        store.save(session_with_message("a", "3"), false);

        let ids: Vec<_> = store.get_all().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_save_survives_quota_exhaustion() {
        let store = LocalStore::with_backend(Arc::new(MemoryBackend::with_quota(64)));
        let mut session = ChatSession::with_id("big", "Too big");
        session.push_message(ChatMessage::user("x".repeat(500)));

        let saved = store.save(session, false);
        assert_eq!(saved.messages.len(), 1);
        assert!(store.get_by_id("big").is_none());
    }

    #[test]
    fn test_save_with_trigger_notifies_hook() {
        let store = LocalStore::in_memory();
        let hook = Arc::new(RecordingHook::default());
        store.attach_sync(hook.clone());

        store.save(session_with_message("s1", "hi"), true);
        store.save(session_with_message("s2", "hi"), false);

        assert_eq!(*hook.scheduled.lock().unwrap(), vec!["s1".to_string()]);

        store.detach_sync();
        store.save(session_with_message("s3", "hi"), true);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_removes_session_and_cid_entry() {
        let store = LocalStore::in_memory();
        let hook = Arc::new(RecordingHook::default());
        store.attach_sync(hook.clone());

        let saved = store.save(session_with_message("s1", "hi"), false);
        assert!(store.record_cid("s1", "bafk1", saved.revision, 1));
        assert!(store.get_cid_for_chat("s1").is_some());

        assert!(store.delete("s1"));
        assert!(store.get_by_id("s1").is_none());
        assert!(store.get_cid_for_chat("s1").is_none());
        assert_eq!(*hook.cancelled.lock().unwrap(), vec!["s1".to_string()]);

        assert!(!store.delete("s1"));
    }

    #[test]
    fn test_record_cid_updates_session_and_side_table() {
        let store = LocalStore::in_memory();
        let saved = store.save(session_with_message("s1", "hi"), false);

        assert!(store.record_cid("s1", "bafkabc", saved.revision, 1));

        let session = store.get_by_id("s1").unwrap();
        let record = store.get_cid_for_chat("s1").unwrap();
        assert_eq!(session.cid.as_deref(), Some("bafkabc"));
        assert_eq!(record.cid, "bafkabc");
        assert_eq!(record.message_count, 1);
        assert_eq!(session.updated_at, saved.updated_at);
        assert_eq!(session.revision, saved.revision);
        assert!(!store.needs_sync(&session));
    }

    #[test]
    fn test_record_cid_rejects_stale_revision() {
        let store = LocalStore::in_memory();
        let first = store.save(session_with_message("s1", "one"), false);
        let second = store.save(first.clone(), false);

        assert!(!store.record_cid("s1", "bafkold", first.revision, 1));
        assert!(store.get_by_id("s1").unwrap().cid.is_none());
        assert!(store.get_cid_for_chat("s1").is_none());
        assert!(store.needs_sync(&second));
    }

    #[test]
    fn test_record_cid_for_missing_session_is_ignored() {
        let store = LocalStore::in_memory();
        assert!(!store.record_cid("ghost", "bafk", 1, 0));
        assert!(store.cid_table().is_empty());
    }

    #[test]
    fn test_needs_sync_after_new_edit() {
        let store = LocalStore::in_memory();
        let saved = store.save(session_with_message("s1", "one"), false);
        assert!(store.needs_sync(&saved));

        store.record_cid("s1", "bafk1", saved.revision, 1);
        let mut current = store.get_by_id("s1").unwrap();
        assert!(!store.needs_sync(&current));

        current.push_message(ChatMessage::assistant("two"));
        let edited = store.save(current, false);
        assert!(store.needs_sync(&edited));
    }

    #[test]
    fn test_put_many_keeps_fields_and_records_cids() {
        let store = LocalStore::in_memory();
        let mut imported = session_with_message("imp", "hello");
        imported.updated_at = 1234;
        imported.created_at = 1000;
        imported.revision = 7;
        imported.cid = Some("bafkimp".to_string());

        assert_eq!(store.put_many(vec![imported.clone()]), 1);
        assert_eq!(store.get_by_id("imp").unwrap(), imported);
        let record = store.get_cid_for_chat("imp").unwrap();
        assert_eq!(record.revision, 7);
        assert!(!store.needs_sync(&imported));
    }

    #[test]
    fn test_put_many_over_archived_session_keeps_cid_mapping_consistent() {
        let store = LocalStore::in_memory();
        let mut current = store.save(session_with_message("a", "one"), false);
        for text in ["two", "three"] {
            current.push_message(ChatMessage::user(text));
            current = store.save(current, false);
        }
        assert_eq!(current.revision, 3);
        assert!(store.record_cid("a", "bafkold", current.revision, 3));

        let mut imported = session_with_message("a", "from file");
        imported.revision = 0;
        store.put_many(vec![imported]);

        let session = store.get_by_id("a").unwrap();
        assert!(session.revision > 3);
        assert_eq!(session.cid, None);
        assert!(store.get_cid_for_chat("a").is_none());
        assert!(store.needs_sync(&session));

        // An upload of the pre-import content can no longer claim the session
        assert!(!store.record_cid("a", "bafkold", 3, 3));

        let mut restored = session.clone();
        restored.cid = Some("bafknew".to_string());
        store.put_many(vec![restored]);
        let session = store.get_by_id("a").unwrap();
        let record = store.get_cid_for_chat("a").unwrap();
        assert_eq!(session.cid.as_deref(), Some(record.cid.as_str()));
        assert_eq!(record.revision, session.revision);
        assert!(!store.needs_sync(&session));
    }

    #[test]
    fn test_last_sync_round_trip() {
        let store = LocalStore::in_memory();
        assert!(store.last_sync().is_none());
        store.set_last_sync(1_700_000_000_000);
        assert_eq!(store.last_sync(), Some(1_700_000_000_000));
    }

    #[test]
    fn test_find_by_prefix() {
        let store = LocalStore::in_memory();
        store.save(session_with_message("abcdef-1", "x"), false);
        store.save(session_with_message("abzzzz-2", "y"), false);
        assert_eq!(store.find_by_prefix("abc").len(), 1);
        assert_eq!(store.find_by_prefix("ab").len(), 2);
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = LocalStore::in_memory();
        let saved = store.save(session_with_message("s1", "x"), false);
        store.record_cid("s1", "bafk", saved.revision, 1);
        store.clear();
        assert!(store.get_all().is_empty());
        assert!(store.cid_table().is_empty());
    }

    #[test]
    fn test_open_persists_to_disk() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = LocalStore::open(dir.path().join("store")).expect("open failed");
        store.save(session_with_message("disk", "persisted"), false);
        assert_eq!(store.get_by_id("disk").unwrap().messages[0].content, "persisted");
    }
}
