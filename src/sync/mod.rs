//! Sync coordinator
//!
//! Decides when local chat state is pushed to the archive. Each session edit
//! arms a debounce timer; rapid edits re-arm it so a burst produces a single
//! upload of the latest state. A periodic sweep uploads every session whose
//! local revision is ahead of its recorded CID. `force_sync` skips the wait.
//!
//! Per session: `Idle -> Pending -> Uploading -> Idle`. A failed upload also
//! returns to `Idle`; the next edit or sweep retries it.
//!
//! Uploads that are already running are never cancelled, so two uploads of
//! one session can race. The store only records a CID whose revision is
//! still current, so a slow upload of an older state cannot overwrite the
//! CID of a newer one.
//!
//! All timer state lives in the [`SyncManager`]; call [`SyncManager::stop`]
//! to cancel timers and end the periodic task.

use crate::archive::{ArchiveClient, FileDescriptor, UploadMetadata};
use crate::config::SyncConfig;
use crate::crypto::SessionCipher;
use crate::error::{classify, ChatSyncError, Result};
use crate::metrics::{self, UploadOutcomeLabel};
use crate::storage::{now_millis, ChatSession, LocalStore, SyncHook};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

mod report;

pub use report::{PullReport, SessionSyncState, SyncEvent, SyncReport, UploadOutcome};

const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct PeriodicTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<LocalStore>,
    archive: Arc<dyn ArchiveClient>,
    cipher: Arc<SessionCipher>,
    config: SyncConfig,
    timers: Mutex<HashMap<String, PendingTimer>>,
    in_flight: Mutex<HashMap<String, usize>>,
    periodic: Mutex<Option<PeriodicTask>>,
    identity: RwLock<Option<String>>,
    events: broadcast::Sender<SyncEvent>,
    next_generation: AtomicU64,
}

/// Coordinates debounced, periodic and forced uploads
///
/// Cloning is cheap and every clone drives the same timers.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    /// Create a manager; nothing runs until a save is scheduled or
    /// [`SyncManager::start`] is called
    pub fn new(
        store: Arc<LocalStore>,
        archive: Arc<dyn ArchiveClient>,
        cipher: Arc<SessionCipher>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                archive,
                cipher,
                config,
                timers: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                periodic: Mutex::new(None),
                identity: RwLock::new(None),
                events,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// The local store this manager writes CIDs into
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.inner.store
    }

    /// Subscribe to sync notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Route store saves (`trigger_remote_sync = true`) and deletes through
    /// this manager
    pub fn start(&self) {
        let hook = Arc::new(StoreHook {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner.store.attach_sync(hook);
        tracing::debug!("Sync manager attached to local store");
    }

    /// Detach from the store, cancel every pending timer and stop the
    /// periodic sweep; uploads already running finish on their own
    pub fn stop(&self) {
        self.inner.store.detach_sync();
        let timers: Vec<PendingTimer> = lock(&self.inner.timers).drain().map(|(_, t)| t).collect();
        for timer in &timers {
            timer.handle.abort();
        }
        metrics::set_pending_uploads(0);
        self.stop_periodic_sync();
        tracing::debug!("Sync manager stopped, {} timers cancelled", timers.len());
    }

    /// Set or clear the identity used for sessions without an owner address
    pub fn set_identity(&self, address: Option<&str>) {
        let normalized = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_lowercase);
        *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) = normalized;
    }

    /// The active identity, lower-cased
    pub fn identity(&self) -> Option<String> {
        self.inner.identity()
    }

    /// Arm (or re-arm) the debounced upload of `session`
    ///
    /// Any timer already armed for the same id is cancelled first. When the
    /// timer fires, the session as passed here is encrypted and uploaded,
    /// and its CID recorded. Failures are logged and published as
    /// [`SyncEvent::Failed`]; local state stays as it was.
    pub fn schedule_save(&self, session: ChatSession) {
        self.inner.schedule(session);
    }

    /// Cancel the pending timer for `id`; returns whether one was armed
    pub fn cancel(&self, id: &str) -> bool {
        self.inner.cancel_timer(id)
    }

    /// Upload `id` now, bypassing the debounce window
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown sessions and any encryption or archive
    /// error from the upload
    pub async fn force_sync(&self, id: &str) -> Result<UploadOutcome> {
        self.inner.cancel_timer(id);
        let session = self
            .inner
            .store
            .get_by_id(id)
            .ok_or_else(|| ChatSyncError::NotFound(format!("chat {}", id)))?;
        self.inner.upload(session).await
    }

    /// Delete a session locally and cancel its pending upload
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.inner.store.delete(id);
        self.inner.cancel_timer(id);
        removed
    }

    /// Upload every session whose local revision is ahead of its CID
    pub async fn sync_all(&self) -> SyncReport {
        self.inner.sweep().await
    }

    /// Start the periodic sweep for `address`
    ///
    /// Replaces any sweep already running. The first sweep runs one period
    /// after the call.
    pub fn start_periodic_sync(&self, address: &str) {
        self.set_identity(Some(address));

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = self
            .inner
            .config
            .interval()
            .max(std::time::Duration::from_millis(1));
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.sweep().await;
                    }
                }
            }
            tracing::debug!("Periodic sync loop exited");
        });

        let previous = lock(&self.inner.periodic).replace(PeriodicTask { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::debug!("Replaced running periodic sync");
        }
        tracing::info!("Periodic sync every {:?}", period);
    }

    /// Stop the periodic sweep; a sweep in progress completes first
    pub fn stop_periodic_sync(&self) {
        if let Some(task) = lock(&self.inner.periodic).take() {
            task.token.cancel();
            tracing::info!("Periodic sync stopped");
        }
    }

    /// Whether a periodic sweep is scheduled
    pub fn is_periodic_running(&self) -> bool {
        lock(&self.inner.periodic)
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Whether a debounce timer is armed for `id`
    pub fn has_pending(&self, id: &str) -> bool {
        lock(&self.inner.timers).contains_key(id)
    }

    /// Number of armed debounce timers
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    /// Current pipeline state of `id`
    pub fn session_state(&self, id: &str) -> SessionSyncState {
        if self.inner.is_in_flight(id) {
            SessionSyncState::Uploading
        } else if self.has_pending(id) {
            SessionSyncState::Pending
        } else {
            SessionSyncState::Idle
        }
    }

    /// Fetch, decrypt and store the session archived at `cid`
    ///
    /// # Errors
    ///
    /// Returns archive errors from the download, `Decryption` when the blob
    /// does not open with `address`, and `Validation` for malformed sessions
    pub async fn restore(&self, cid: &str, address: &str) -> Result<ChatSession> {
        let session = self.inner.fetch_session(cid, address).await?;
        self.inner.store.put_many(vec![session.clone()]);
        tracing::info!("Restored chat {} from {}", session.id, cid);
        Ok(session)
    }

    /// Archived objects owned by `address`, oldest first
    pub async fn list_remote(&self, address: &str) -> Result<Vec<FileDescriptor>> {
        self.inner.archive.list_by_owner(address).await
    }

    /// Restore every archived session of `address` that is missing locally
    /// or newer than the local copy
    ///
    /// # Errors
    ///
    /// Returns the listing error; per-object failures are counted instead
    pub async fn pull(&self, address: &str) -> Result<PullReport> {
        let listed = self.inner.archive.list_by_owner(address).await?;

        let mut latest: BTreeMap<String, (i64, String)> = BTreeMap::new();
        for descriptor in listed {
            let Some(metadata) = descriptor.metadata else {
                continue;
            };
            let Some(session_id) = metadata.session_id else {
                continue;
            };
            let newer = latest
                .get(&session_id)
                .map(|(ts, _)| metadata.timestamp > *ts)
                .unwrap_or(true);
            if newer {
                latest.insert(session_id, (metadata.timestamp, descriptor.cid));
            }
        }

        let mut report = PullReport::default();
        for (session_id, (_, cid)) in latest {
            let local = self.inner.store.get_by_id(&session_id);
            if local.as_ref().and_then(|l| l.cid.as_deref()) == Some(cid.as_str()) {
                report.unchanged += 1;
                continue;
            }

            match self.inner.fetch_session(&cid, address).await {
                Ok(remote) => {
                    let local_is_newer = local
                        .map(|l| l.updated_at >= remote.updated_at)
                        .unwrap_or(false);
                    if local_is_newer {
                        report.unchanged += 1;
                    } else {
                        self.inner.store.put_many(vec![remote]);
                        report.restored += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not restore chat {} from {}: {}", session_id, cid, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Pulled {} chats ({} unchanged, {} failed)",
            report.restored,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }
}

impl Inner {
    fn identity(&self) -> Option<String> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn schedule(self: &Arc<Self>, session: ChatSession) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "No async runtime; chat {} will sync on the next sweep",
                session.id
            );
            return;
        };

        let id = session.id.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = self.config.debounce();
        let inner = Arc::clone(self);

        // The lock is held until the new entry is in the map, so the timer
        // task cannot look itself up before it is registered.
        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.remove(&id) {
            previous.handle.abort();
        }
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.take_timer(&session.id, generation) {
                return;
            }
            if inner.already_synced(&session) {
                tracing::debug!(
                    "Chat {} revision {} already archived",
                    session.id,
                    session.revision
                );
                return;
            }
            let id = session.id.clone();
            if let Err(e) = inner.upload(session).await {
                inner.report_failure(&id, &e);
            }
        });
        timers.insert(id.clone(), PendingTimer { generation, handle });
        metrics::set_pending_uploads(timers.len());
        tracing::debug!("Armed upload for chat {} in {:?}", id, delay);
    }

    fn take_timer(&self, id: &str, generation: u64) -> bool {
        let mut timers = lock(&self.timers);
        match timers.get(id) {
            Some(timer) if timer.generation == generation => {
                timers.remove(id);
                metrics::set_pending_uploads(timers.len());
                true
            }
            _ => false,
        }
    }

    fn cancel_timer(&self, id: &str) -> bool {
        let mut timers = lock(&self.timers);
        match timers.remove(id) {
            Some(timer) => {
                timer.handle.abort();
                metrics::set_pending_uploads(timers.len());
                tracing::debug!("Cancelled pending upload for chat {}", id);
                true
            }
            None => false,
        }
    }

    fn is_in_flight(&self, id: &str) -> bool {
        lock(&self.in_flight).contains_key(id)
    }

    fn already_synced(&self, session: &ChatSession) -> bool {
        self.store
            .get_cid_for_chat(&session.id)
            .map(|record| record.revision >= session.revision)
            .unwrap_or(false)
    }

    fn key_address(&self, session: &ChatSession) -> Result<String> {
        session
            .owner_address()
            .or_else(|| self.identity())
            .ok_or_else(|| {
                ChatSyncError::Encryption(format!(
                    "chat {} has no owner address and no identity is active",
                    session.id
                ))
                .into()
            })
    }

    async fn upload(&self, session: ChatSession) -> Result<UploadOutcome> {
        let started = Instant::now();
        let _in_flight = InFlight::enter(self, &session.id);

        let address = match self.key_address(&session) {
            Ok(address) => address,
            Err(e) => {
                metrics::record_upload(UploadOutcomeLabel::Failed, started.elapsed());
                return Err(e);
            }
        };
        let payload = match self.cipher.encrypt_session(&session, &address) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::record_upload(UploadOutcomeLabel::Failed, started.elapsed());
                return Err(e);
            }
        };

        let mut extra = BTreeMap::new();
        extra.insert("kind".to_string(), serde_json::json!("chat-session"));
        extra.insert("revision".to_string(), serde_json::json!(session.revision));
        extra.insert("updatedAt".to_string(), serde_json::json!(session.updated_at));
        let metadata = UploadMetadata {
            name: format!("chat-{}.enc", session.id),
            address: Some(address),
            session_id: Some(session.id.clone()),
            message_count: session.messages.len(),
            timestamp: now_millis(),
            extra,
        };

        tracing::debug!(
            "Uploading chat {} revision {}",
            session.id,
            session.revision
        );
        let cid = match self.archive.upload(payload.into_bytes(), Some(metadata)).await {
            Ok(cid) => cid,
            Err(e) => {
                metrics::record_upload(UploadOutcomeLabel::Failed, started.elapsed());
                return Err(e);
            }
        };

        let applied = self.store.record_cid(
            &session.id,
            &cid,
            session.revision,
            session.messages.len(),
        );
        if applied {
            tracing::info!("Archived chat {} as {}", session.id, cid);
            metrics::record_upload(UploadOutcomeLabel::Success, started.elapsed());
        } else {
            tracing::debug!(
                "Discarded CID {} for chat {}: revision {} is no longer current",
                cid,
                session.id,
                session.revision
            );
            metrics::record_upload(UploadOutcomeLabel::Stale, started.elapsed());
        }

        let outcome = UploadOutcome {
            session_id: session.id,
            cid,
            revision: session.revision,
            applied,
        };
        let _ = self.events.send(SyncEvent::Uploaded(outcome.clone()));
        Ok(outcome)
    }

    fn report_failure(&self, id: &str, err: &anyhow::Error) {
        let persistent = match classify(err) {
            Some(ChatSyncError::Encryption(_)) => {
                tracing::error!("Encryption failed for chat {}: {}", id, err);
                true
            }
            Some(e) if e.is_persistent() => {
                tracing::error!("Upload of chat {} needs attention: {}", id, err);
                true
            }
            _ => {
                tracing::warn!("Upload of chat {} failed, will retry later: {}", id, err);
                false
            }
        };
        let _ = self.events.send(SyncEvent::Failed {
            session_id: id.to_string(),
            message: err.to_string(),
            persistent,
        });
    }

    async fn sweep(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let sessions = self.store.get_all();
        tracing::debug!("Sweeping {} chats", sessions.len());

        for session in sessions {
            if !self.store.needs_sync(&session) || self.is_in_flight(&session.id) {
                report.skipped += 1;
                continue;
            }

            let id = session.id.clone();
            match self.upload(session).await {
                Ok(outcome) if outcome.applied => report.uploaded += 1,
                Ok(_) => report.stale += 1,
                Err(e) => {
                    self.report_failure(&id, &e);
                    report.failed += 1;
                    if classify(&e).map(ChatSyncError::is_persistent).unwrap_or(false) {
                        tracing::warn!("Stopping sweep early: {}", e);
                        break;
                    }
                }
            }
        }

        self.store.set_last_sync(now_millis());
        metrics::record_sweep();
        tracing::info!(
            "Sweep finished: {} uploaded, {} stale, {} skipped, {} failed",
            report.uploaded,
            report.stale,
            report.skipped,
            report.failed
        );
        let _ = self.events.send(SyncEvent::SweepFinished(report.clone()));
        report
    }

    async fn fetch_session(&self, cid: &str, address: &str) -> Result<ChatSession> {
        let bytes = self.archive.download(cid).await?;
        let blob = String::from_utf8(bytes).map_err(|e| {
            ChatSyncError::Decryption(format!("archived blob {} is not text: {}", cid, e))
        })?;
        let mut session = self.cipher.decrypt_session(&blob, address)?;
        crate::transfer::validate_session(&session)?;

        session.cid = Some(cid.to_string());
        if session.address.is_none() {
            session.address = Some(address.trim().to_lowercase());
        }
        Ok(session)
    }
}

/// Marks a session as uploading for the life of the guard
struct InFlight<'a> {
    inner: &'a Inner,
    id: String,
}

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner, id: &str) -> Self {
        *lock(&inner.in_flight).entry(id.to_string()).or_insert(0) += 1;
        Self {
            inner,
            id: id.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(count) = in_flight.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.id);
            }
        }
    }
}

/// Store-side hook; holds the manager weakly so the store does not keep it
/// alive
struct StoreHook {
    inner: Weak<Inner>,
}

impl SyncHook for StoreHook {
    fn schedule(&self, session: ChatSession) {
        if let Some(inner) = self.inner.upgrade() {
            inner.schedule(session);
        }
    }

    fn cancel(&self, id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.cancel_timer(id);
        }
    }
}
