//! Remote archive client abstraction and implementations
//!
//! The archive is an append-only, content-addressed object store: every
//! upload returns a CID computed by the service, blobs are fetched back by
//! CID, and nothing can be deleted. Concrete implementations:
//!
//! - [`http::HttpArchiveClient`] talks to the archive REST API.
//! - [`memory::InMemoryArchive`] keeps objects in process (tests, dry runs).
//! - [`retry::RetryingArchive`] wraps either with bounded exponential backoff.
//!
//! Uploads are wrapped in an [`ArchiveEnvelope`] that carries the optional
//! [`UploadMetadata`]. The service has no per-owner query, so
//! `list_by_owner` filters on the `address` field of that metadata.

use crate::error::{ChatSyncError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod http;
pub mod memory;
pub mod retry;

pub use http::HttpArchiveClient;
pub use memory::InMemoryArchive;
pub use retry::{RetryPolicy, RetryingArchive};

/// Content identifier returned by the archive
pub type Cid = String;

/// Current envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// Metadata attached to an upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    /// File name shown by the archive
    pub name: String,
    /// Owning address, lower-cased
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Chat session the blob belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Messages in the uploaded session
    #[serde(default)]
    pub message_count: usize,
    /// Upload time, epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
    /// Anything else the caller wants recorded
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An object listed by the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Content identifier
    pub cid: Cid,
    /// File name
    #[serde(default)]
    pub name: String,
    /// Stored size in bytes
    #[serde(default)]
    pub size: u64,
    /// Metadata recorded at upload
    #[serde(default)]
    pub metadata: Option<UploadMetadata>,
    /// When the archive accepted the upload, epoch milliseconds
    #[serde(default)]
    pub uploaded_at: Option<i64>,
}

impl FileDescriptor {
    /// Whether this object was uploaded for `address` (case-insensitive)
    pub fn is_owned_by(&self, address: &str) -> bool {
        let wanted = address.trim().to_lowercase();
        self.metadata
            .as_ref()
            .and_then(|m| m.address.as_deref())
            .map(|a| a.trim().to_lowercase() == wanted)
            .unwrap_or(false)
    }
}

/// Keep only descriptors owned by `address`
pub fn filter_by_owner(descriptors: Vec<FileDescriptor>, address: &str) -> Vec<FileDescriptor> {
    descriptors
        .into_iter()
        .filter(|d| d.is_owned_by(address))
        .collect()
}

/// Wire wrapper around uploaded bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEnvelope {
    /// Envelope format version
    pub version: u32,
    /// Optional upload metadata
    #[serde(default)]
    pub metadata: Option<UploadMetadata>,
    /// Payload, base64
    pub data: String,
}

impl ArchiveEnvelope {
    /// Wrap raw bytes
    pub fn wrap(data: &[u8], metadata: Option<UploadMetadata>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            metadata,
            data: STANDARD.encode(data),
        }
    }

    /// Serialize for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored envelope
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Archive` if the bytes are not an envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ChatSyncError::Archive(format!("corrupted envelope: {}", e)).into())
    }

    /// Decode the payload
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Archive` if the payload is not base64
    pub fn into_data(self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| ChatSyncError::Archive(format!("corrupted payload: {}", e)).into())
    }
}

/// Client for the content-addressed archive
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Upload a blob and return the CID the archive assigned
    ///
    /// # Errors
    ///
    /// `MissingCredentials`, `Authentication` and `QuotaExceeded` are final;
    /// `ArchiveTransient` may succeed on retry
    async fn upload(&self, data: Vec<u8>, metadata: Option<UploadMetadata>) -> Result<Cid>;

    /// Fetch the blob stored at `cid`
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown CIDs, `Archive` for corrupted objects
    async fn download(&self, cid: &str) -> Result<Vec<u8>>;

    /// List objects whose metadata names `address` as owner
    async fn list_by_owner(&self, address: &str) -> Result<Vec<FileDescriptor>>;

    /// The archive is append-only; deleting always fails
    async fn delete(&self, cid: &str) -> Result<()> {
        Err(ChatSyncError::ArchiveUnsupported(format!(
            "cannot delete {}: the archive is append-only",
            cid
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(cid: &str, address: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            cid: cid.to_string(),
            name: format!("{}.enc", cid),
            size: 10,
            metadata: Some(UploadMetadata {
                name: format!("{}.enc", cid),
                address: address.map(str::to_string),
                ..UploadMetadata::default()
            }),
            uploaded_at: None,
        }
    }

    #[test]
    fn test_envelope_round_trip_keeps_metadata() {
        let metadata = UploadMetadata {
            name: "chat.enc".to_string(),
            address: Some("0xabc".to_string()),
            session_id: Some("s1".to_string()),
            message_count: 2,
            timestamp: 10,
            extra: BTreeMap::new(),
        };
        let envelope = ArchiveEnvelope::wrap(b"payload", Some(metadata.clone()));
        let parsed = ArchiveEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.metadata, Some(metadata));
        assert_eq!(parsed.into_data().unwrap(), b"payload");
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        let err = ArchiveEnvelope::from_bytes(b"\x00\x01garbage").unwrap_err();
        assert!(err.to_string().contains("corrupted envelope"));
    }

    #[test]
    fn test_envelope_rejects_bad_payload() {
        let envelope = ArchiveEnvelope {
            version: ENVELOPE_VERSION,
            metadata: None,
            data: "%%%".to_string(),
        };
        assert!(envelope.into_data().is_err());
    }

    #[test]
    fn test_filter_by_owner_is_case_insensitive() {
        let listed = vec![
            descriptor("a", Some("0xABC")),
            descriptor("b", Some("0xdef")),
            descriptor("c", None),
        ];
        let owned = filter_by_owner(listed, "0xabc");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].cid, "a");
    }

    #[test]
    fn test_metadata_uses_camel_case() {
        let metadata = UploadMetadata {
            session_id: Some("s1".to_string()),
            message_count: 3,
            ..UploadMetadata::default()
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["messageCount"], 3);
        assert!(value.get("extra").is_none());
    }
}
