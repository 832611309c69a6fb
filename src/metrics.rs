//! Sync metrics
//!
//! # Metrics
//!
//! - `chatsync_uploads_total`: Counter of upload attempts by outcome
//!   (`success`, `stale`, `failed`)
//! - `chatsync_upload_duration_seconds`: Histogram of encrypt + upload time
//! - `chatsync_stale_writebacks_total`: Counter of uploads whose CID was
//!   discarded because the session moved on
//! - `chatsync_upload_retries_total`: Counter of backoff retries by operation
//! - `chatsync_sweeps_total`: Counter of completed periodic sweeps
//! - `chatsync_pending_uploads`: Gauge of armed debounce timers

use metrics::{gauge, histogram, increment_counter};
use std::time::Duration;

/// Upload result label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcomeLabel {
    /// CID recorded
    Success,
    /// Uploaded, but the session moved on before the CID came back
    Stale,
    /// Encryption or archive failure
    Failed,
}

impl UploadOutcomeLabel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Stale => "stale",
            Self::Failed => "failed",
        }
    }
}

/// Record one finished upload attempt
pub fn record_upload(outcome: UploadOutcomeLabel, duration: Duration) {
    increment_counter!("chatsync_uploads_total", "outcome" => outcome.as_str());
    histogram!(
        "chatsync_upload_duration_seconds",
        duration.as_secs_f64(),
        "outcome" => outcome.as_str()
    );
    if outcome == UploadOutcomeLabel::Stale {
        increment_counter!("chatsync_stale_writebacks_total");
    }
}

/// Record a backoff retry
pub fn record_retry(op: &str) {
    increment_counter!("chatsync_upload_retries_total", "op" => op.to_string());
}

/// Record a completed sweep
pub fn record_sweep() {
    increment_counter!("chatsync_sweeps_total");
}

/// Publish the number of armed debounce timers
pub fn set_pending_uploads(count: usize) {
    gauge!("chatsync_pending_uploads", count as f64);
}

/// Initializes the metrics exporter for Prometheus
///
/// When the `prometheus` feature is enabled, this installs the Prometheus
/// exporter on its default endpoint. Otherwise it does nothing.
///
/// # Examples
///
/// ```
/// use chatsync::metrics::init_metrics_exporter;
///
/// init_metrics_exporter();
/// ```
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let _ = builder.install().map_err(|e| {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        });
    }
}
