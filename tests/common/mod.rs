use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use chatsync::archive::InMemoryArchive;
use chatsync::config::{CryptoConfig, SyncConfig};
use chatsync::crypto::SessionCipher;
use chatsync::storage::{ChatMessage, ChatSession, LocalStore};
use chatsync::SyncManager;

#[allow(dead_code)]
pub const OWNER: &str = "0x1111111111111111111111111111111111111111";

#[allow(dead_code)]
pub const DEBOUNCE: Duration = Duration::from_secs(5);

/// Store, archive, cipher and a started manager sharing one in-memory world
#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<LocalStore>,
    pub archive: Arc<InMemoryArchive>,
    pub cipher: Arc<SessionCipher>,
    pub manager: SyncManager,
}

#[allow(dead_code)]
pub fn fast_cipher() -> SessionCipher {
    SessionCipher::new(CryptoConfig {
        iterations: 1_000,
        ..CryptoConfig::default()
    })
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(InMemoryArchive::new())
}

#[allow(dead_code)]
pub fn harness_with(archive: InMemoryArchive) -> Harness {
    let store = Arc::new(LocalStore::in_memory());
    let archive = Arc::new(archive);
    let cipher = Arc::new(fast_cipher());
    let config = SyncConfig {
        debounce_ms: DEBOUNCE.as_millis() as u64,
        ..SyncConfig::default()
    };
    let manager = SyncManager::new(store.clone(), archive.clone(), cipher.clone(), config);
    manager.start();
    Harness {
        store,
        archive,
        cipher,
        manager,
    }
}

#[allow(dead_code)]
pub fn owned_chat(id: &str, text: &str) -> ChatSession {
    let mut session = ChatSession::with_id(id, "Test chat").owned_by(OWNER);
    session.push_message(ChatMessage::user(text));
    session
}

/// Let spawned timer tasks run after the clock moved
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("chatsync.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
