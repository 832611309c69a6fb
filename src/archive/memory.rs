//! In-process content-addressed archive
//!
//! Objects live in a map keyed by CID, where the CID is `bafk` followed by
//! the hex SHA-256 of the stored envelope. Every call is recorded so tests
//! can assert on what was uploaded, and failures or latency can be injected
//! to exercise retry and race handling.

use super::{filter_by_owner, ArchiveClient, ArchiveEnvelope, Cid, FileDescriptor, UploadMetadata};
use crate::error::{ChatSyncError, Result};
use crate::storage::now_millis;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Failure to return from the next call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Network-style failure, retriable
    Transient,
    /// Account quota exhausted
    Quota,
    /// Credential rejected
    Unauthorized,
}

impl InjectedFailure {
    fn into_error(self) -> anyhow::Error {
        match self {
            Self::Transient => ChatSyncError::ArchiveTransient("injected network failure".into()),
            Self::Quota => ChatSyncError::QuotaExceeded("injected quota failure".into()),
            Self::Unauthorized => ChatSyncError::Authentication("injected auth failure".into()),
        }
        .into()
    }
}

/// A recorded upload
#[derive(Debug, Clone)]
pub struct UploadCall {
    /// CID assigned to the upload
    pub cid: Cid,
    /// Raw bytes passed to `upload`
    pub data: Vec<u8>,
    /// Metadata passed to `upload`
    pub metadata: Option<UploadMetadata>,
}

#[derive(Default)]
struct State {
    objects: HashMap<Cid, (Vec<u8>, FileDescriptor)>,
    uploads: Vec<UploadCall>,
    upload_attempts: usize,
    downloads: usize,
    failures: VecDeque<InjectedFailure>,
}

/// Archive kept entirely in memory
#[derive(Default)]
pub struct InMemoryArchive {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryArchive {
    /// Create an empty archive
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an archive whose uploads take `latency` of (tokio) time
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            latency: Some(latency),
        }
    }

    /// Fail the next `times` calls with `failure`
    pub fn fail_next(&self, failure: InjectedFailure, times: usize) {
        let mut state = self.lock();
        for _ in 0..times {
            state.failures.push_back(failure);
        }
    }

    /// Successful uploads, oldest first
    pub fn uploads(&self) -> Vec<UploadCall> {
        self.lock().uploads.clone()
    }

    /// Number of successful uploads
    pub fn upload_count(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Number of upload calls, including failed ones
    pub fn upload_attempts(&self) -> usize {
        self.lock().upload_attempts
    }

    /// Number of download calls
    pub fn download_count(&self) -> usize {
        self.lock().downloads
    }

    /// Whether an object is stored under `cid`
    pub fn contains(&self, cid: &str) -> bool {
        self.lock().objects.contains_key(cid)
    }

    /// Overwrite the stored bytes of `cid`, simulating corruption
    pub fn corrupt(&self, cid: &str, bytes: Vec<u8>) {
        if let Some(entry) = self.lock().objects.get_mut(cid) {
            entry.0 = bytes;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(&self) -> Option<InjectedFailure> {
        self.lock().failures.pop_front()
    }
}

/// CID for a stored envelope
pub fn content_id(bytes: &[u8]) -> Cid {
    format!("bafk{:x}", Sha256::digest(bytes))
}

#[async_trait::async_trait]
impl ArchiveClient for InMemoryArchive {
    async fn upload(&self, data: Vec<u8>, metadata: Option<UploadMetadata>) -> Result<Cid> {
        self.lock().upload_attempts += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(failure) = self.take_failure() {
            return Err(failure.into_error());
        }

        let stored = ArchiveEnvelope::wrap(&data, metadata.clone()).to_bytes()?;
        let cid = content_id(&stored);
        let descriptor = FileDescriptor {
            cid: cid.clone(),
            name: metadata.as_ref().map(|m| m.name.clone()).unwrap_or_default(),
            size: stored.len() as u64,
            metadata: metadata.clone(),
            uploaded_at: Some(now_millis()),
        };

        let mut state = self.lock();
        state.objects.insert(cid.clone(), (stored, descriptor));
        state.uploads.push(UploadCall {
            cid: cid.clone(),
            data,
            metadata,
        });
        Ok(cid)
    }

    async fn download(&self, cid: &str) -> Result<Vec<u8>> {
        self.lock().downloads += 1;
        if let Some(failure) = self.take_failure() {
            return Err(failure.into_error());
        }
        let stored = self
            .lock()
            .objects
            .get(cid)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| ChatSyncError::NotFound(format!("no object stored at {}", cid)))?;
        ArchiveEnvelope::from_bytes(&stored)?.into_data()
    }

    async fn list_by_owner(&self, address: &str) -> Result<Vec<FileDescriptor>> {
        if let Some(failure) = self.take_failure() {
            return Err(failure.into_error());
        }
        let mut listed: Vec<FileDescriptor> = self
            .lock()
            .objects
            .values()
            .map(|(_, d)| d.clone())
            .collect();
        listed.sort_by_key(|d| d.uploaded_at);
        Ok(filter_by_owner(listed, address))
    }
}
