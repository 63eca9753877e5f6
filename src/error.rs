//! Error types for archive-tasks
//!
//! A single crate-wide [`Error`] covers the whole taxonomy:
//! - adapter resolution failures (no backend, unknown format)
//! - source and I/O failures raised while streaming archives
//! - transport failures raised by the download collaborator
//! - lookup failures for unknown task ids
//!
//! Every failure that happens inside a task's execution path is caught by the
//! [`TaskManager`](crate::TaskManager) and turned into a `task:failed` event, so
//! these variants mostly surface through awaited handles.

use crate::codec::Operation;
use crate::types::{TaskId, TaskStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for archive-tasks operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for archive-tasks
#[derive(Debug, Error)]
pub enum Error {
    /// No registered adapter can perform the operation on this path
    #[error("no adapter found to {operation} {path}")]
    NoAdapterFound {
        /// The archive path that was being resolved
        path: PathBuf,
        /// The requested operation
        operation: Operation,
    },

    /// Magic-byte sniffing did not recognise the archive
    #[error("unknown archive format: {0}")]
    UnknownFormat(PathBuf),

    /// Root source path is missing or not a directory
    #[error("source {path} is not accessible: {reason}")]
    SourceInaccessible {
        /// The source path that could not be used
        path: PathBuf,
        /// Why the source is unusable
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive is corrupt or could not be written by the codec
    #[error("archive error for {archive}: {reason}")]
    Archive {
        /// The archive being read or written
        archive: PathBuf,
        /// The reason reported by the codec
        reason: String,
    },

    /// Unknown task id
    #[error("task not found: {0}")]
    NotFound(String),

    /// Download transport failure
    #[error("transport error: {message}")]
    Transport {
        /// What went wrong
        message: String,
        /// HTTP status of the response, when one was received
        status: Option<u16>,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A task the caller waited on finished in the failed state
    #[error("task {id} failed: {message}")]
    TaskFailed {
        /// The failed task
        id: TaskId,
        /// The stored failure message
        message: String,
    },

    /// A state change the task state machine does not allow
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The task whose transition was rejected
        id: TaskId,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "compression_level")
        key: Option<String>,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code, stable across message wording changes
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NoAdapterFound { .. } => "no_adapter_found",
            Error::UnknownFormat(_) => "unknown_format",
            Error::SourceInaccessible { .. } => "source_inaccessible",
            Error::Io(_) => "io_error",
            Error::Archive { .. } => "archive_error",
            Error::NotFound(_) => "not_found",
            Error::Transport { .. } => "transport_error",
            Error::Network(_) => "transport_error",
            Error::TaskFailed { .. } => "task_failed",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Config { .. } => "config_error",
            Error::ShuttingDown => "shutting_down",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Transport failure for a response with a non-success status
    pub(crate) fn http_status(status: reqwest::StatusCode, url: &str) -> Self {
        Error::Transport {
            message: format!("HTTP {status} fetching {url}"),
            status: Some(status.as_u16()),
        }
    }

    /// Shorthand for codec failures on a given archive
    pub(crate) fn archive(archive: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Archive {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }
}
