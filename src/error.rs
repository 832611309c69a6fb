//! Error types for chatsync
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for chatsync operations
///
/// Covers local storage, encryption, remote archive, import validation
/// and configuration failures. Archive failures are split by whether a
/// retry could help; see [`ChatSyncError::is_transient`].
#[derive(Error, Debug)]
pub enum ChatSyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local storage errors (quota, malformed documents, backend failures)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encryption failed or no key material was available
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decryption failed: wrong key, corrupted or truncated blob
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// No archive credential configured
    #[error("Missing credentials for archive: {0}")]
    MissingCredentials(String),

    /// The archive rejected the credential (401/403)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The per-account upload quota is exhausted
    #[error("Archive quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The requested CID does not exist in the archive
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure or 5xx response; safe to retry
    #[error("Transient archive error: {0}")]
    ArchiveTransient(String),

    /// Any other archive failure (unexpected status, corrupted envelope)
    #[error("Archive error: {0}")]
    Archive(String),

    /// Operation the append-only archive cannot perform
    #[error("Unsupported archive operation: {0}")]
    ArchiveUnsupported(String),

    /// Malformed import payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl ChatSyncError {
    /// Returns `true` when retrying the failed operation may succeed.
    ///
    /// Only network-level failures and server-side (5xx) errors are
    /// transient. Credential, quota and not-found failures are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ArchiveTransient(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` for failures the user has to act on (credential,
    /// quota). These are surfaced as notifications instead of retried.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials(_) | Self::Authentication(_) | Self::QuotaExceeded(_)
        )
    }
}

/// Classify an `anyhow::Error` produced by this crate.
///
/// Returns the underlying [`ChatSyncError`] when there is one.
pub fn classify(err: &anyhow::Error) -> Option<&ChatSyncError> {
    err.downcast_ref::<ChatSyncError>()
}

/// Returns `true` if the error chain carries a transient [`ChatSyncError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    classify(err).map(ChatSyncError::is_transient).unwrap_or(false)
}

/// Result type alias for chatsync operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ChatSyncError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_storage_error_display() {
        let error = ChatSyncError::Storage("quota exceeded".to_string());
        assert_eq!(error.to_string(), "Storage error: quota exceeded");
    }

    #[test]
    fn test_decryption_error_display() {
        let error = ChatSyncError::Decryption("authentication failed".to_string());
        assert_eq!(error.to_string(), "Decryption error: authentication failed");
    }

    #[test]
    fn test_missing_credentials_error_display() {
        let error = ChatSyncError::MissingCredentials("api_key".to_string());
        assert_eq!(error.to_string(), "Missing credentials for archive: api_key");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChatSyncError::ArchiveTransient("503".into()).is_transient());
        assert!(!ChatSyncError::Authentication("401".into()).is_transient());
        assert!(!ChatSyncError::QuotaExceeded("full".into()).is_transient());
        assert!(!ChatSyncError::NotFound("cid".into()).is_transient());
        assert!(!ChatSyncError::MissingCredentials("key".into()).is_transient());
    }

    #[test]
    fn test_persistent_classification() {
        assert!(ChatSyncError::QuotaExceeded("full".into()).is_persistent());
        assert!(ChatSyncError::MissingCredentials("key".into()).is_persistent());
        assert!(!ChatSyncError::ArchiveTransient("503".into()).is_persistent());
    }

    #[test]
    fn test_classify_through_anyhow() {
        let err: anyhow::Error = ChatSyncError::ArchiveTransient("reset".into()).into();
        assert!(is_transient(&err));
        assert!(matches!(
            classify(&err),
            Some(ChatSyncError::ArchiveTransient(_))
        ));

        let other = anyhow::anyhow!("plain failure");
        assert!(classify(&other).is_none());
        assert!(!is_transient(&other));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ChatSyncError = json_error.into();
        assert!(matches!(error, ChatSyncError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: ChatSyncError = yaml_error.into();
        assert!(matches!(error, ChatSyncError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatSyncError>();
    }
}
