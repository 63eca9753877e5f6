//! Shared test helpers for creating TaskManager instances in tests.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::manager::TaskManager;
use crate::transport::{FetchRequest, TransferProgress, Transport};
use crate::types::{DownloadResult, ProgressSnapshot, TaskEvent, TaskId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Config rooted in `root`, reporting progress without throttling
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.backup_dir = root.join("backups");
    config.storage.restore_dir = root.join("restores");
    config.download.download_dir = root.join("downloads");
    config.archive.progress_interval = Duration::ZERO;
    config
}

/// Helper to create a test TaskManager with an in-memory transport.
/// Returns the manager and the tempdir (which must be kept alive).
pub(crate) async fn create_test_manager() -> (TaskManager, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let manager = TaskManager::with_transport(
        test_config(temp_dir.path()),
        Arc::new(MemoryTransport::serving(b"hello from memory".to_vec())),
    )
    .await
    .unwrap();
    (manager, temp_dir)
}

/// `site/file1.txt` and `site/subdir/nested1.txt` under `root`
pub(crate) fn write_sample_tree(root: &Path) -> PathBuf {
    let site = root.join("site");
    std::fs::create_dir_all(site.join("subdir")).unwrap();
    std::fs::write(site.join("file1.txt"), "Content 1").unwrap();
    std::fs::write(site.join("subdir/nested1.txt"), "Nested 1").unwrap();
    site
}

/// Every event published on the manager's bus, in publish order
pub(crate) fn record_events(manager: &TaskManager) -> Arc<Mutex<Vec<TaskEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    manager
        .events()
        .subscribe_any(move |_, event: &TaskEvent| sink.lock().unwrap().push(event.clone()));
    log
}

/// Event names recorded for one task
pub(crate) fn event_names(log: &Mutex<Vec<TaskEvent>>, id: TaskId) -> Vec<&'static str> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|e| e.task().id == id)
        .map(TaskEvent::name)
        .collect()
}

/// Transport writing a fixed body, or failing with a fixed message
pub(crate) struct MemoryTransport {
    body: std::result::Result<Vec<u8>, String>,
}

impl MemoryTransport {
    pub(crate) fn serving(body: Vec<u8>) -> Self {
        Self { body: Ok(body) }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            body: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(
        &self,
        request: FetchRequest<'_>,
        progress: Option<TransferProgress>,
    ) -> Result<DownloadResult> {
        let body = self
            .body
            .clone()
            .map_err(|message| Error::Transport {
                message,
                status: None,
            })?;
        let name = request.file_name.unwrap_or("memory.bin");
        let path = request.directory.join(name);
        tokio::fs::create_dir_all(request.directory).await?;

        let half = body.len() / 2;
        if let Some(progress) = &progress {
            let current = Some(name.to_string());
            progress(
                ProgressSnapshot::from_bytes(half as u64, body.len() as u64, current),
                4096,
            );
        }
        tokio::fs::write(&path, &body).await?;
        if let Some(progress) = &progress {
            progress(
                ProgressSnapshot::finished(body.len() as u64, body.len() as u64),
                8192,
            );
        }

        Ok(DownloadResult {
            file_path: path,
            size: body.len() as u64,
        })
    }
}
