//! Bounded exponential backoff for archive calls
//!
//! Transient failures (network errors, 5xx) are retried with delays of
//! `base * 2^n` capped at `max_delay`, up to `max_attempts` total attempts.
//! Anything else surfaces after the first attempt. No per-attempt timeout is
//! imposed here.

use super::{ArchiveClient, Cid, FileDescriptor, UploadMetadata};
use crate::config::RetryConfig;
use crate::error::{is_transient, Result};
use std::future::Future;
use std::time::Duration;

/// Retry schedule for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based)
    ///
    /// # Examples
    ///
    /// ```
    /// use chatsync::archive::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 4,
    ///     base_delay: Duration::from_millis(500),
    ///     max_delay: Duration::from_secs(1),
    /// };
    /// assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    /// assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(1));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `op`, retrying transient failures
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient error
    /// once attempts are exhausted
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "Archive {} failed (attempt {}/{}), retrying in {:?}: {}",
                        op_name,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    crate::metrics::record_retry(op_name);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps an archive client with a [`RetryPolicy`]
pub struct RetryingArchive<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ArchiveClient> RetryingArchive<C> {
    /// Wrap `inner`
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<C: ArchiveClient> ArchiveClient for RetryingArchive<C> {
    async fn upload(&self, data: Vec<u8>, metadata: Option<UploadMetadata>) -> Result<Cid> {
        self.policy
            .run("upload", || self.inner.upload(data.clone(), metadata.clone()))
            .await
    }

    async fn download(&self, cid: &str) -> Result<Vec<u8>> {
        self.policy
            .run("download", || self.inner.download(cid))
            .await
    }

    async fn list_by_owner(&self, address: &str) -> Result<Vec<FileDescriptor>> {
        self.policy
            .run("list", || self.inner.list_by_owner(address))
            .await
    }

    async fn delete(&self, cid: &str) -> Result<()> {
        self.inner.delete(cid).await
    }
}
