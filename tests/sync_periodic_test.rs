//! Integration tests for periodic sweeps, retries, restore and pull

mod common;

use std::sync::Arc;
use std::time::Duration;

use chatsync::archive::memory::InjectedFailure;
use chatsync::archive::{InMemoryArchive, RetryPolicy, RetryingArchive};
use chatsync::config::SyncConfig;
use chatsync::error::ChatSyncError;
use chatsync::storage::{ChatMessage, ChatSession, LocalStore};
use chatsync::sync::SyncEvent;
use chatsync::transfer;
use chatsync::SyncManager;
use common::{fast_cipher, harness, owned_chat, settle, DEBOUNCE, OWNER};

const INTERVAL: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep_uploads_unsynced_sessions() {
    let h = harness();
    h.store.save(owned_chat("a", "one"), false);
    h.store.save(owned_chat("b", "two"), false);
    assert!(h.store.last_sync().is_none());

    h.manager.start_periodic_sync(OWNER);
    assert!(h.manager.is_periodic_running());

    tokio::time::sleep(INTERVAL - Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(h.archive.upload_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(h.archive.upload_count(), 2);
    assert!(h.store.last_sync().is_some());
    for id in ["a", "b"] {
        let session = h.store.get_by_id(id).unwrap();
        assert!(!h.store.needs_sync(&session));
    }

    // Nothing changed, so the next sweep uploads nothing
    tokio::time::sleep(INTERVAL).await;
    settle().await;
    assert_eq!(h.archive.upload_count(), 2);

    h.manager.stop_periodic_sync();
    assert!(!h.manager.is_periodic_running());
}

#[tokio::test(start_paused = true)]
async fn test_starting_periodic_sync_twice_keeps_one_sweep() {
    let h = harness();
    let mut events = h.manager.subscribe();

    h.manager.start_periodic_sync(OWNER);
    h.manager.start_periodic_sync(OWNER);

    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    settle().await;

    let mut sweeps = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SyncEvent::SweepFinished(_)) {
            sweeps += 1;
        }
    }
    assert_eq!(sweeps, 1);
    h.manager.stop();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_identity_keys_unowned_sessions() {
    let h = harness();
    let mut session = ChatSession::with_id("anon", "No owner");
    session.push_message(ChatMessage::user("hi"));
    h.store.save(session, false);

    h.manager.start_periodic_sync(OWNER);
    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    settle().await;

    let upload = &h.archive.uploads()[0];
    let blob = String::from_utf8(upload.data.clone()).unwrap();
    assert!(h.cipher.decrypt_session(&blob, OWNER).is_ok());
    h.manager.stop();
}

#[tokio::test(start_paused = true)]
async fn test_sweep_without_any_address_reports_encryption_failure() {
    let h = harness();
    let mut events = h.manager.subscribe();
    h.store.save(ChatSession::with_id("anon", "No owner"), false);

    let report = h.manager.sync_all().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.archive.upload_attempts(), 0);

    match events.try_recv().unwrap() {
        SyncEvent::Failed {
            session_id,
            persistent,
            ..
        } => {
            assert_eq!(session_id, "anon");
            assert!(persistent);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff() {
    let store = Arc::new(LocalStore::in_memory());
    let archive = Arc::new(RetryingArchive::new(
        InMemoryArchive::new(),
        RetryPolicy::default(),
    ));
    archive.inner().fail_next(InjectedFailure::Transient, 2);
    let manager = SyncManager::new(
        store.clone(),
        archive.clone(),
        Arc::new(fast_cipher()),
        SyncConfig::default(),
    );
    store.save(owned_chat("s1", "retry me"), false);

    let started = tokio::time::Instant::now();
    let outcome = manager.force_sync("s1").await.expect("third attempt succeeds");
    assert!(outcome.applied);
    assert_eq!(archive.inner().upload_attempts(), 3);
    // 500ms + 1000ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(1_500));
}

#[tokio::test(start_paused = true)]
async fn test_quota_failure_is_not_retried_and_keeps_state() {
    let h = harness();
    h.archive.fail_next(InjectedFailure::Quota, 1);
    h.store.save(owned_chat("s1", "big"), false);

    let err = h.manager.force_sync("s1").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ChatSyncError>(),
        Some(ChatSyncError::QuotaExceeded(_))
    ));
    let session = h.store.get_by_id("s1").unwrap();
    assert!(session.cid.is_none());
    assert!(h.store.needs_sync(&session));

    // A later sweep succeeds
    let report = h.manager.sync_all().await;
    assert_eq!(report.uploaded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pull_restores_on_second_device() {
    let first = harness();
    first.store.save(owned_chat("a", "from laptop"), false);
    first.store.save(owned_chat("b", "also laptop"), false);
    first.manager.sync_all().await;

    let other_store = Arc::new(LocalStore::in_memory());
    let second = SyncManager::new(
        other_store.clone(),
        first.archive.clone(),
        Arc::new(fast_cipher()),
        SyncConfig::default(),
    );

    let report = second.pull(OWNER).await.expect("pull");
    assert_eq!(report.restored, 2);
    assert_eq!(report.failed, 0);

    let restored = other_store.get_by_id("a").expect("restored a");
    assert_eq!(restored.messages[0].content, "from laptop");
    assert_eq!(restored.cid, first.store.get_by_id("a").unwrap().cid);
    assert!(!other_store.needs_sync(&restored));

    // Another owner sees nothing
    let stranger = second
        .pull("0x2222222222222222222222222222222222222222")
        .await
        .unwrap();
    assert_eq!(stranger.restored, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pull_keeps_newer_local_edits() {
    let h = harness();
    let session = h.store.save(owned_chat("s1", "old"), false);
    h.manager.force_sync("s1").await.unwrap();

    // Edit locally after the upload; the archive copy is now older
    tokio::time::sleep(Duration::from_secs(1)).await;
    let mut edited = session;
    edited.push_message(ChatMessage::user("newer"));
    h.store.save(edited, false);

    let report = h.manager.pull(OWNER).await.unwrap();
    assert_eq!(report.restored, 0);
    assert_eq!(h.store.get_by_id("s1").unwrap().messages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_remote_object_counts_as_failure() {
    let h = harness();
    h.store.save(owned_chat("s1", "hello"), false);
    let outcome = h.manager.force_sync("s1").await.unwrap();
    h.manager.delete("s1");

    h.archive.corrupt(&outcome.cid, b"not an envelope".to_vec());
    let report = h.manager.pull(OWNER).await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(h.store.get_by_id("s1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_import_over_archived_chat_is_uploaded_again() {
    let h = harness();
    let mut session = h.store.save(owned_chat("a", "one"), false);
    for text in ["two", "three"] {
        session.push_message(ChatMessage::user(text));
        session = h.store.save(session, false);
    }
    let first = h.manager.force_sync("a").await.unwrap();
    assert!(first.applied);

    let json = format!(
        r#"[{{"id":"a","title":"From backup","messages":[{{"id":"m1","role":"user","content":"imported","timestamp":1}}],"createdAt":1,"updatedAt":2,"address":"{}"}}]"#,
        OWNER
    );
    transfer::import(&h.store, &json, false).unwrap();

    let imported = h.store.get_by_id("a").unwrap();
    assert_eq!(
        imported.cid,
        h.store.get_cid_for_chat("a").map(|record| record.cid)
    );
    assert!(h.store.needs_sync(&imported));

    let mut edited = imported;
    edited.push_message(ChatMessage::assistant("edited after import"));
    h.store.save(edited, true);
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(100)).await;
    settle().await;

    assert_eq!(h.archive.upload_count(), 2);
    let latest = h.store.get_by_id("a").unwrap();
    let record = h.store.get_cid_for_chat("a").expect("edit archived");
    assert_eq!(latest.cid.as_deref(), Some(record.cid.as_str()));
    assert_ne!(record.cid, first.cid);
    assert!(!h.store.needs_sync(&latest));

    let uploaded = h
        .cipher
        .decrypt_session(
            &String::from_utf8(h.archive.uploads()[1].data.clone()).unwrap(),
            OWNER,
        )
        .unwrap();
    assert_eq!(uploaded.messages[0].content, "imported");
    assert_eq!(uploaded.messages[1].content, "edited after import");

    let report = h.manager.sync_all().await;
    assert_eq!(report.uploaded, 0);
    h.manager.stop();
}
