use super::test_helpers::{
    MemoryTransport, create_test_manager, event_names, record_events, test_config,
    write_sample_tree,
};
use super::*;
use crate::types::{
    BackupOptions, DownloadOptions, DownloadResult, ProgressSnapshot, RestoreOptions,
    TASK_PROGRESS, TaskPayload, TaskType, UnpackOptions,
};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;


/// Payload for tasks driven directly through `spawn_task`
fn download_payload() -> TaskPayload {
    TaskPayload::Download {
        url: "memory://test".to_string(),
        file_name: None,
        directory: PathBuf::from("/tmp"),
    }
}

fn download_result() -> DownloadResult {
    DownloadResult {
        file_path: PathBuf::from("/tmp/out.bin"),
        size: 3,
    }
}
