//! # archive-tasks
//!
//! Asynchronous task engine for long-running archive and download jobs.
//!
//! ## Design Philosophy
//!
//! archive-tasks is designed to be:
//! - **Non-blocking** - Every operation returns a handle immediately; the work runs in the background
//! - **Observable** - Every state change is published as an event carrying the full task snapshot
//! - **Streaming** - Archives are packed and unpacked entry by entry, so memory use stays flat
//! - **Pluggable** - New archive formats are added by registering an adapter
//!
//! ## Quick Start
//!
//! ```no_run
//! use archive_tasks::{BackupOptions, Config, RestoreOptions, TaskManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TaskManager::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{} {}% ({})", event.name(), event.task().progress, event.task().id);
//!         }
//!     });
//!
//!     let backup = manager.create_backup("./site", BackupOptions::default())?.await?;
//!     let restored = manager
//!         .restore_backup(&backup.backup_path, RestoreOptions::default())?
//!         .await?;
//!     println!("restored into {:?}", restored.destination_path);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Streaming archive codecs and the adapter registry
pub mod codec;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Synchronous publish/subscribe event bus
pub mod events;
/// Task orchestration (decomposed into focused submodules)
pub mod manager;
/// Progress throttling and byte accounting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Directory size estimation for progress denominators
pub mod size_estimator;
/// Download transports
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use codec::{AdapterInfo, AdapterRegistry, ArchiveAdapter, Capability, Operation};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, Subscription};
pub use manager::{TaskHandle, TaskManager};
pub use transport::{HttpTransport, Transport};
pub use types::{
    BackupOptions, BackupResult, DownloadOptions, DownloadResult, ProgressSnapshot,
    RestoreOptions, RestoreResult, Task, TaskEvent, TaskId, TaskResult, TaskStatus, TaskType,
    UnpackOptions, UnpackResult,
};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal and then calls the manager's `shutdown()` method,
/// which lets running tasks finish.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use archive_tasks::{Config, TaskManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = TaskManager::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(manager).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: TaskManager) {
    wait_for_signal().await;
    manager.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(term), Err(int)) => {
            tracing::error!(
                sigterm_error = %term,
                sigint_error = %int,
                "Could not register any signal handlers, using ctrl_c fallback"
            );
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
