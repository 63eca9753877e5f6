//! Core types for archive-tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Event published when a task is created
pub const TASK_CREATED: &str = "task:created";
/// Event published when a task starts executing
pub const TASK_STARTED: &str = "task:started";
/// Event published on every accepted progress update
pub const TASK_PROGRESS: &str = "task:progress";
/// Event published when a task completes successfully
pub const TASK_COMPLETED: &str = "task:completed";
/// Event published when a task fails
pub const TASK_FAILED: &str = "task:failed";

/// Unique identifier for a task
///
/// Random (UUID v4) rather than a counter so ids stay unique when many tasks
/// are created concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    /// Generate a fresh random id
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Kind of work a task performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Fetch a remote file
    Download,
    /// Compress a directory into an archive
    Compress,
    /// Restore an archive into a folder
    Decompress,
    /// Extract an archive next to it, optionally deleting the archive
    Unpack,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Download => "download",
            TaskType::Compress => "compress",
            TaskType::Decompress => "decompress",
            TaskType::Unpack => "unpack",
        };
        f.write_str(s)
    }
}

/// Task status
///
/// `Pending -> InProgress -> Completed | Failed`. `Completed` and `Failed` are
/// terminal. `Cancelled` is part of the model but nothing produces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not started yet
    Pending,
    /// Executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Reserved
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transition can leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Progress proposed by a codec adapter or transport
///
/// Adapters only hand these to their progress callback; the manager decides
/// what ends up on the task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Progress percentage (0.0 to 100.0, may overshoot slightly)
    pub percentage: f64,
    /// Bytes processed so far
    pub processed_bytes: u64,
    /// Estimated total bytes
    pub total_bytes: u64,
    /// File currently being processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

impl ProgressSnapshot {
    /// Build a snapshot from byte counters
    ///
    /// A zero total yields 0%; the final flush of an operation reports 100%
    /// explicitly.
    pub fn from_bytes(
        processed_bytes: u64,
        total_bytes: u64,
        current_file: Option<String>,
    ) -> Self {
        let percentage = if total_bytes > 0 {
            processed_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };
        Self {
            percentage,
            processed_bytes,
            total_bytes,
            current_file,
        }
    }

    /// Snapshot marking the end of an operation
    pub fn finished(processed_bytes: u64, total_bytes: u64) -> Self {
        Self {
            percentage: 100.0,
            processed_bytes,
            total_bytes: total_bytes.max(processed_bytes),
            current_file: None,
        }
    }
}

/// Last-known progress details of a task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    /// Last reported percentage
    pub percentage: f64,
    /// Bytes processed so far
    pub processed_bytes: u64,
    /// Estimated total bytes
    pub total_bytes: u64,
    /// File currently being processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    /// Operation-specific extras (e.g. `speed_bps` for downloads)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskDetails {
    /// Overwrite the snapshot fields and merge extras
    pub(crate) fn merge(
        &mut self,
        snapshot: &ProgressSnapshot,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        self.percentage = snapshot.percentage;
        self.processed_bytes = snapshot.processed_bytes;
        self.total_bytes = snapshot.total_bytes;
        self.current_file = snapshot.current_file.clone();
        if let Some(extra) = extra {
            self.extra.extend(extra);
        }
    }
}

/// Archive format written by a backup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// ZIP archive (.zip)
    Zip,
    /// Gzip-compressed tarball (.tar.gz, .tgz)
    TarGz,
    /// Plain tarball (.tar)
    Tar,
}

impl ArchiveFormat {
    /// Extension used when naming new archives
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::Tar => ".tar",
        }
    }
}

/// Operation inputs, fixed at creation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Inputs of `create_backup`
    Backup {
        /// Directory being archived
        source_dir: PathBuf,
        /// Archive to create
        output_path: PathBuf,
        /// Compression level (1-9)
        compression_level: u32,
        /// Format of the archive
        format: ArchiveFormat,
    },
    /// Inputs of `restore_backup`
    Restore {
        /// Archive to restore
        archive_path: PathBuf,
        /// Folder receiving the files
        destination: PathBuf,
    },
    /// Inputs of `unpack`
    Unpack {
        /// Archive to extract
        archive_path: PathBuf,
        /// Folder receiving the files
        destination: PathBuf,
        /// Remove the archive after a successful extraction
        delete_after_unpack: bool,
    },
    /// Inputs of `download`
    Download {
        /// Source URL
        url: String,
        /// Requested file name; otherwise derived from the response
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        /// Directory receiving the file
        directory: PathBuf,
    },
}

/// Result of a backup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResult {
    /// Archive that was written
    pub backup_path: PathBuf,
    /// Archive size in bytes
    pub size: u64,
}

/// Result of a restore
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Folder the archive was restored into
    pub destination_path: PathBuf,
}

/// Result of an unpack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackResult {
    /// Folder the archive was extracted into
    pub unpack_dir: PathBuf,
    /// Extracted files, relative to `unpack_dir`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<PathBuf>>,
}

/// Result of a download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Where the file was written
    pub file_path: PathBuf,
    /// Bytes written
    pub size: u64,
}

/// Result stored on a completed task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    /// See [`BackupResult`]
    Backup(BackupResult),
    /// See [`RestoreResult`]
    Restore(RestoreResult),
    /// See [`UnpackResult`]
    Unpack(UnpackResult),
    /// See [`DownloadResult`]
    Download(DownloadResult),
}

/// Typed output of an operation, convertible to and from [`TaskResult`]
pub trait TaskOutput: Clone + Send + Sync + 'static {
    /// Wrap into the stored result
    fn into_result(self) -> TaskResult;

    /// Recover the typed output from a stored result
    fn from_result(result: &TaskResult) -> Option<Self>;
}

macro_rules! impl_task_output {
    ($ty:ty, $variant:ident) => {
        impl TaskOutput for $ty {
            fn into_result(self) -> TaskResult {
                TaskResult::$variant(self)
            }

            fn from_result(result: &TaskResult) -> Option<Self> {
                match result {
                    TaskResult::$variant(r) => Some(r.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_task_output!(BackupResult, Backup);
impl_task_output!(RestoreResult, Restore);
impl_task_output!(UnpackResult, Unpack);
impl_task_output!(DownloadResult, Download);

impl TaskOutput for TaskResult {
    fn into_result(self) -> TaskResult {
        self
    }

    fn from_result(result: &TaskResult) -> Option<Self> {
        Some(result.clone())
    }
}

/// A tracked unit of asynchronous work
///
/// Values handed out by the manager are snapshots; later changes to the task
/// never show up in a copy the caller already holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID
    pub id: TaskId,
    /// Kind of work
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Current status
    pub status: TaskStatus,
    /// Integer progress (0 to 100), never decreases
    pub progress: u8,
    /// Operation inputs
    pub payload: TaskPayload,
    /// Last progress snapshot
    pub details: TaskDetails,
    /// Output, set only when completed
    pub result: Option<TaskResult>,
    /// Failure reason, set only when failed
    pub error: Option<String>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// Refreshed on every state change and progress update
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn new(task_type: TaskType, payload: TaskPayload) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type,
            status: TaskStatus::Pending,
            progress: 0,
            payload,
            details: TaskDetails::default(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the task reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status change allowed by the state machine
    pub(crate) fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Lifecycle event published by the task manager
///
/// Every variant carries the full task snapshot taken right after the change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "task")]
pub enum TaskEvent {
    /// `task:created`
    #[serde(rename = "task:created")]
    Created(Task),
    /// `task:started`
    #[serde(rename = "task:started")]
    Started(Task),
    /// `task:progress`
    #[serde(rename = "task:progress")]
    Progress(Task),
    /// `task:completed`
    #[serde(rename = "task:completed")]
    Completed(Task),
    /// `task:failed`
    #[serde(rename = "task:failed")]
    Failed(Task),
}

impl TaskEvent {
    /// Event name used on the bus
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Created(_) => TASK_CREATED,
            TaskEvent::Started(_) => TASK_STARTED,
            TaskEvent::Progress(_) => TASK_PROGRESS,
            TaskEvent::Completed(_) => TASK_COMPLETED,
            TaskEvent::Failed(_) => TASK_FAILED,
        }
    }

    /// The task snapshot carried by the event
    pub fn task(&self) -> &Task {
        match self {
            TaskEvent::Created(t)
            | TaskEvent::Started(t)
            | TaskEvent::Progress(t)
            | TaskEvent::Completed(t)
            | TaskEvent::Failed(t) => t,
        }
    }
}

/// Callback invoked with the typed result once a task completes
///
/// Only fires on success. Failures are observable through the handle and
/// the `task:failed` event.
pub type CompletionCallback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Options for [`TaskManager::create_backup`](crate::TaskManager::create_backup)
#[derive(Default)]
pub struct BackupOptions {
    /// Archive file name (sanitized); generated from the source name when absent
    pub output_filename: Option<String>,
    /// Write a ZIP instead of a .tar.gz (default from config)
    pub use_zip: Option<bool>,
    /// Compression level 1-9 (default from config)
    pub compression_level: Option<u32>,
    /// Success callback
    pub on_complete: Option<CompletionCallback<BackupResult>>,
}

/// Options for [`TaskManager::restore_backup`](crate::TaskManager::restore_backup)
#[derive(Default)]
pub struct RestoreOptions {
    /// Folder name under the restore directory (default: archive name)
    pub destination_folder_name: Option<String>,
    /// Success callback
    pub on_complete: Option<CompletionCallback<RestoreResult>>,
}

/// Options for [`TaskManager::unpack`](crate::TaskManager::unpack)
#[derive(Default)]
pub struct UnpackOptions {
    /// Extraction folder (default: next to the archive, named after it)
    pub destination: Option<PathBuf>,
    /// Remove the archive after extracting it
    pub delete_after_unpack: bool,
    /// Success callback
    pub on_complete: Option<CompletionCallback<UnpackResult>>,
}

/// Options for [`TaskManager::download`](crate::TaskManager::download)
#[derive(Default)]
pub struct DownloadOptions {
    /// Target file name (default: from the response or URL)
    pub file_name: Option<String>,
    /// Success callback
    pub on_complete: Option<CompletionCallback<DownloadResult>>,
}

macro_rules! impl_on_complete {
    ($opts:ty, $out:ty) => {
        impl $opts {
            /// Attach a success callback
            pub fn on_complete(mut self, callback: impl FnOnce($out) + Send + 'static) -> Self {
                self.on_complete = Some(Box::new(callback));
                self
            }
        }
    };
}

impl_on_complete!(BackupOptions, BackupResult);
impl_on_complete!(RestoreOptions, RestoreResult);
impl_on_complete!(UnpackOptions, UnpackResult);
impl_on_complete!(DownloadOptions, DownloadResult);
