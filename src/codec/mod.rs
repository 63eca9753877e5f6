//! Pluggable streaming archive codecs
//!
//! An [`ArchiveAdapter`] packs a directory into an archive or unpacks an
//! archive into a directory, streaming entries so memory use stays flat for
//! archives much larger than RAM. Adapters live in an [`AdapterRegistry`],
//! which picks the first one able to handle a path for a given [`Operation`].
//!
//! Built-in adapters:
//! - [`ZipAdapter`]: `.zip`, both directions
//! - [`TarGzAdapter`]: `.tar.gz`, `.tgz` and plain `.tar`, both directions
//!
//! Supporting a new format only requires implementing [`ArchiveAdapter`] and
//! registering it; the task manager never looks at concrete adapters.

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod detect;
pub(crate) mod pipeline;
pub mod registry;
pub mod tar;
pub(crate) mod walk;
pub mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use self::detect::{DetectedFormat, sniff_format};
pub use self::registry::{AdapterInfo, AdapterRegistry};
pub use self::tar::TarGzAdapter;
pub use self::zip::ZipAdapter;

/// Default bound on concurrently written output files per extraction
pub const MAX_CONCURRENT_FILES: usize = 5;

/// What an adapter is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Directory to archive
    Compress,
    /// Archive to directory
    Decompress,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Compress => write!(f, "compress"),
            Operation::Decompress => write!(f, "decompress"),
        }
    }
}

/// Operations an adapter declares it supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Writes archives only
    Compress,
    /// Reads archives only
    Decompress,
    /// Reads and writes archives
    Both,
}

impl Capability {
    /// Whether this capability covers `operation`
    pub fn supports(self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (Capability::Both, _)
                | (Capability::Compress, Operation::Compress)
                | (Capability::Decompress, Operation::Decompress)
        )
    }
}

/// Options for [`ArchiveAdapter::compress`]
#[derive(Clone)]
pub struct CompressOptions {
    /// Compression level, 1 (fastest) to 9 (smallest)
    pub compression_level: u32,
    /// Receives throttled progress snapshots
    pub progress: Option<ProgressCallback>,
    /// Minimum time between two progress reports
    pub progress_interval: Duration,
    /// Depth of the walk estimating the progress denominator
    pub size_estimate_depth: usize,
    /// Read buffer size for file contents
    pub chunk_size: usize,
}

impl CompressOptions {
    /// Options matching an [`ArchiveConfig`]
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            compression_level: config.compression_level,
            progress: None,
            progress_interval: config.progress_interval,
            size_estimate_depth: config.size_estimate_depth,
            chunk_size: config.chunk_size,
        }
    }

    /// Use `level` instead of the configured level
    pub fn with_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Report progress to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self::from_config(&ArchiveConfig::default())
    }
}

impl std::fmt::Debug for CompressOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressOptions")
            .field("compression_level", &self.compression_level)
            .field("progress", &self.progress.is_some())
            .field("progress_interval", &self.progress_interval)
            .field("size_estimate_depth", &self.size_estimate_depth)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Options for [`ArchiveAdapter::decompress`]
#[derive(Clone)]
pub struct DecompressOptions {
    /// Receives throttled progress snapshots
    pub progress: Option<ProgressCallback>,
    /// Minimum time between two progress reports
    pub progress_interval: Duration,
    /// Upper bound on output files being written at the same time
    pub max_concurrent_files: usize,
    /// Read buffer size for entry contents
    pub chunk_size: usize,
}

impl DecompressOptions {
    /// Options matching an [`ArchiveConfig`]
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            progress: None,
            progress_interval: config.progress_interval,
            max_concurrent_files: config.max_concurrent_files,
            chunk_size: config.chunk_size,
        }
    }

    /// Report progress to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl Default for DecompressOptions {
    fn default() -> Self {
        Self::from_config(&ArchiveConfig::default())
    }
}

impl std::fmt::Debug for DecompressOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressOptions")
            .field("progress", &self.progress.is_some())
            .field("progress_interval", &self.progress_interval)
            .field("max_concurrent_files", &self.max_concurrent_files)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// A streaming archive backend for one format family
///
/// # Examples
///
/// ```no_run
/// use archive_tasks::codec::{ArchiveAdapter, CompressOptions, DecompressOptions, ZipAdapter};
/// use std::path::Path;
///
/// # async fn example() -> archive_tasks::Result<()> {
/// let zip = ZipAdapter;
/// zip.compress(Path::new("site"), Path::new("site.zip"), CompressOptions::default())
///     .await?;
/// let files = zip
///     .decompress(Path::new("site.zip"), Path::new("restored"), DecompressOptions::default())
///     .await?;
/// println!("restored {} files", files.len());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ArchiveAdapter: Send + Sync {
    /// Short name used in logs and capability reports
    fn name(&self) -> &'static str;

    /// Operations this adapter performs
    fn capability(&self) -> Capability;

    /// Lowercase file name suffixes this adapter recognises (with leading dot)
    fn extensions(&self) -> &'static [&'static str];

    /// Magic-byte signatures this adapter can read
    ///
    /// Consulted when no adapter claims a path by extension.
    fn signatures(&self) -> &'static [DetectedFormat] {
        &[]
    }

    /// Whether `path` looks like one of this adapter's archives
    ///
    /// The default implementation matches the file name suffix case-insensitively.
    fn can_handle(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_ascii_lowercase();
        self.extensions().iter().any(|ext| name.ends_with(ext))
    }

    /// Stream every file under `source_dir` into a new archive at `output_path`
    ///
    /// # Errors
    ///
    /// - [`Error::SourceInaccessible`](crate::Error::SourceInaccessible) if
    ///   `source_dir` is missing or not a directory
    /// - [`Error::Io`](crate::Error::Io) or [`Error::Archive`](crate::Error::Archive)
    ///   if reading a file or writing the archive fails
    async fn compress(
        &self,
        source_dir: &Path,
        output_path: &Path,
        options: CompressOptions,
    ) -> Result<()>;

    /// Extract `archive` into `destination`, creating it if needed
    ///
    /// Returns the extracted file paths relative to `destination`. Permission
    /// bits stored in the archive are applied on Unix. Entries that would land
    /// outside `destination` are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read or an output file cannot
    /// be written.
    async fn decompress(
        &self,
        archive: &Path,
        destination: &Path,
        options: DecompressOptions,
    ) -> Result<Vec<PathBuf>>;
}

/// Map a `spawn_blocking` join failure into the crate error
pub(crate) fn join_error(e: tokio::task::JoinError) -> crate::Error {
    crate::Error::Other(format!("codec worker failed: {e}"))
}
