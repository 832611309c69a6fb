//! Configuration management for chatsync
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatSyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for chatsync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local store settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Remote archive settings
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Debounce and periodic sync settings
    #[serde(default)]
    pub sync: SyncConfig,
    /// Encryption settings
    #[serde(default)]
    pub crypto: CryptoConfig,
    /// Owning identity
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Local store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the embedded database; defaults to the user data dir
    #[serde(default)]
    pub path: Option<String>,
}

impl StorageConfig {
    /// Resolve the store location
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Storage` if no path is configured and the
    /// user data directory cannot be determined
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => Ok(PathBuf::from(path)),
            None => crate::storage::default_store_path(),
        }
    }
}

/// Remote archive configuration
///
/// The archive network is fixed infrastructure: `api_base` names the one
/// environment this deployment talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the archive API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API credential; falls back to the OS keyring when unset
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds; unset leaves the HTTP client default
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_base() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            request_timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for archive calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Sync scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period before a session edit is uploaded (milliseconds)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Period of the background sweep (seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Whether `watch` runs the periodic sweep
    #[serde(default = "default_periodic_enabled")]
    pub periodic: bool,
}

fn default_debounce_ms() -> u64 {
    5_000
}

fn default_interval_secs() -> u64 {
    60
}

fn default_periodic_enabled() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            interval_secs: default_interval_secs(),
            periodic: default_periodic_enabled(),
        }
    }
}

impl SyncConfig {
    /// Debounce window as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Sweep period as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// KDF salt
    #[serde(default = "default_salt")]
    pub salt: String,

    /// PBKDF2 iteration count
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Optional second key factor joined with the address
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_salt() -> String {
    "chatsync-history-v1".to_string()
}

fn default_iterations() -> u32 {
    100_000
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            salt: default_salt(),
            iterations: default_iterations(),
            passphrase: None,
        }
    }
}

/// Owning identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Wallet address used as key material and listing filter
    #[serde(default)]
    pub address: Option<String>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatSyncError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatSyncError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(path) = std::env::var("CHATSYNC_STORAGE_PATH") {
            self.storage.path = Some(path);
        }

        if let Ok(api_base) = std::env::var("CHATSYNC_ARCHIVE_API_BASE") {
            self.archive.api_base = api_base;
        }

        if let Ok(api_key) = std::env::var("CHATSYNC_ARCHIVE_API_KEY") {
            self.archive.api_key = Some(api_key);
        }

        if let Ok(address) = std::env::var("CHATSYNC_ADDRESS") {
            self.identity.address = Some(address);
        }

        if let Ok(passphrase) = std::env::var("CHATSYNC_PASSPHRASE") {
            self.crypto.passphrase = Some(passphrase);
        }

        if let Ok(debounce) = std::env::var("CHATSYNC_DEBOUNCE_MS") {
            match debounce.parse() {
                Ok(ms) => self.sync.debounce_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid CHATSYNC_DEBOUNCE_MS: {}", debounce),
            }
        }

        if let Ok(interval) = std::env::var("CHATSYNC_SYNC_INTERVAL_SECS") {
            match interval.parse() {
                Ok(secs) => self.sync.interval_secs = secs,
                Err(_) => {
                    tracing::warn!("Ignoring invalid CHATSYNC_SYNC_INTERVAL_SECS: {}", interval)
                }
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(address) = &cli.address {
            self.identity.address = Some(address.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ChatSyncError::Config` if any value is out of range
    pub fn validate(&self) -> Result<()> {
        if self.archive.api_base.trim().is_empty() {
            return Err(
                ChatSyncError::Config("archive.api_base cannot be empty".to_string()).into(),
            );
        }

        if url::Url::parse(&self.archive.api_base).is_err() {
            return Err(ChatSyncError::Config(format!(
                "archive.api_base is not a valid URL: {}",
                self.archive.api_base
            ))
            .into());
        }

        if self.archive.retry.max_attempts == 0 {
            return Err(ChatSyncError::Config(
                "archive.retry.max_attempts must be greater than 0".to_string(),
            )
            .into());
        }

        if self.archive.retry.max_attempts > 10 {
            return Err(ChatSyncError::Config(
                "archive.retry.max_attempts must be less than or equal to 10".to_string(),
            )
            .into());
        }

        if self.archive.retry.base_delay_ms > self.archive.retry.max_delay_ms {
            return Err(ChatSyncError::Config(
                "archive.retry.base_delay_ms must not exceed max_delay_ms".to_string(),
            )
            .into());
        }

        if self.sync.interval_secs == 0 {
            return Err(ChatSyncError::Config(
                "sync.interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.crypto.iterations == 0 {
            return Err(ChatSyncError::Config(
                "crypto.iterations must be greater than 0".to_string(),
            )
            .into());
        }

        if self.crypto.salt.is_empty() {
            return Err(ChatSyncError::Config("crypto.salt cannot be empty".to_string()).into());
        }

        Ok(())
    }

    /// Owning address, lower-cased, if configured
    pub fn address(&self) -> Option<String> {
        self.identity
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_lowercase)
    }
}
