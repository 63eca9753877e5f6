//! Test configuration helpers for creating task managers inside a temp dir

use archive_tasks::{Config, TaskManager};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Config with every directory under `root` and unthrottled progress
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.backup_dir = root.join("backups");
    config.storage.restore_dir = root.join("restores");
    config.download.download_dir = root.join("downloads");
    config.archive.progress_interval = Duration::ZERO;
    config.download.retry.max_attempts = 2;
    config.download.retry.initial_delay = Duration::from_millis(5);
    config.download.retry.max_delay = Duration::from_millis(20);
    config.download.retry.jitter = false;
    config
}

/// Create a manager with the HTTP transport, rooted in a fresh temp dir
///
/// The temp dir must be kept alive for the duration of the test.
pub async fn create_test_manager() -> (TaskManager, TempDir) {
    let temp_dir = TempDir::new().expect("create temp dir");
    let manager = TaskManager::new(test_config(temp_dir.path()))
        .await
        .expect("create task manager");
    (manager, temp_dir)
}
