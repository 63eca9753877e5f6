//! Configuration types for archive-tasks

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Archive codec settings (compression, concurrency, progress cadence)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Default compression level, 1 (fastest) to 9 (smallest) (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Write ZIP archives unless a backup asks otherwise (default: true)
    #[serde(default = "default_true")]
    pub prefer_zip: bool,

    /// Maximum output files written concurrently by one extraction (default: 5)
    ///
    /// The budget is per extraction; concurrent unpacks each get their own.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Minimum time between two progress reports of one operation (default: 100ms)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub progress_interval: Duration,

    /// Depth of the directory walk used to estimate backup size (default: 3)
    #[serde(default = "default_size_estimate_depth")]
    pub size_estimate_depth: usize,

    /// Buffer size for streaming file contents (default: 64 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
            prefer_zip: true,
            max_concurrent_files: default_max_concurrent_files(),
            progress_interval: default_progress_interval(),
            size_estimate_depth: default_size_estimate_depth(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Where backups and restores land
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving new backups (default: "./backups")
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Directory receiving restored backups (default: "./restores")
    #[serde(default = "default_restore_dir")]
    pub restore_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            restore_dir: default_restore_dir(),
        }
    }
}

/// HTTP download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory receiving downloads (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Whole-request timeout (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry policy for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            timeout: default_download_timeout(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Event delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventConfig {
    /// Listener count per event above which a warning is logged (default: 100)
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,

    /// Buffer of the broadcast side-channel (default: 1000)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_listeners: default_max_listeners(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Main configuration for the [`TaskManager`](crate::TaskManager)
///
/// Sub-configs are flattened, so the serialized form is a single flat object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Codec settings
    #[serde(flatten)]
    pub archive: ArchiveConfig,

    /// Backup and restore locations
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// HTTP download settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Event delivery settings
    #[serde(flatten)]
    pub events: EventConfig,
}

impl Config {
    /// Load a configuration from a JSON file; missing keys take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.archive.compression_level) {
            return Err(config_error(
                "compression_level",
                format!(
                    "compression level must be between 1 and 9, got {}",
                    self.archive.compression_level
                ),
            ));
        }
        if self.archive.max_concurrent_files == 0 {
            return Err(config_error(
                "max_concurrent_files",
                "at least one concurrent file write is required",
            ));
        }
        if self.archive.chunk_size == 0 {
            return Err(config_error("chunk_size", "chunk size must be positive"));
        }
        if self.events.channel_capacity == 0 {
            return Err(config_error(
                "channel_capacity",
                "event channel capacity must be positive",
            ));
        }
        let multiplier = self.download.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier",
                format!("backoff multiplier must be finite and at least 1.0, got {multiplier}"),
            ));
        }
        Ok(())
    }
}

fn config_error(key: &str, message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_compression_level() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_files() -> usize {
    5
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_size_estimate_depth() -> usize {
    3
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_restore_dir() -> PathBuf {
    PathBuf::from("restores")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    concat!("archive-tasks/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_listeners() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    1000
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
