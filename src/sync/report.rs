use crate::archive::Cid;

/// Where a session stands in the upload pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSyncState {
    /// Nothing armed or running
    Idle,
    /// A debounce timer is armed
    Pending,
    /// An upload is in flight
    Uploading,
}

/// Result of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Uploaded session
    pub session_id: String,
    /// CID the archive assigned
    pub cid: Cid,
    /// Session revision that was uploaded
    pub revision: u64,
    /// Whether the CID was written back; `false` when the session changed
    /// or disappeared while the upload was in flight
    pub applied: bool,
}

/// Totals of one sweep over the local store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Sessions uploaded with their CID recorded
    pub uploaded: usize,
    /// Sessions uploaded but edited again before the CID came back
    pub stale: usize,
    /// Sessions already in sync or with an upload in flight
    pub skipped: usize,
    /// Sessions whose upload failed
    pub failed: usize,
}

/// Totals of pulling an owner's sessions from the archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Sessions written locally from the archive
    pub restored: usize,
    /// Remote sessions that were not newer than the local copy
    pub unchanged: usize,
    /// Remote objects that could not be fetched or decrypted
    pub failed: usize,
}

/// Notification published by the sync manager
///
/// Front ends subscribe to these to show dismissible notices for failures
/// that need the user (missing credential, quota) while transient ones stay
/// quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An upload finished
    Uploaded(UploadOutcome),
    /// A background upload failed
    Failed {
        /// Session whose upload failed
        session_id: String,
        /// Error text
        message: String,
        /// The user has to act (credential, quota, encryption)
        persistent: bool,
    },
    /// A sweep finished
    SweepFinished(SyncReport),
}
