//! Custom test assertions for integration tests

use archive_tasks::{TaskEvent, TaskManager};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Every regular file under `root`, keyed by its path relative to `root`
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .expect("walked path is under root")
                .to_path_buf();
            let bytes = std::fs::read(e.path()).expect("read walked file");
            (relative, bytes)
        })
        .collect()
}

/// Assert two trees hold the same files with the same bytes
pub fn assert_same_tree(expected: &Path, actual: &Path) {
    let expected_files = snapshot_tree(expected);
    let actual_files = snapshot_tree(actual);
    assert_eq!(
        expected_files.keys().collect::<Vec<_>>(),
        actual_files.keys().collect::<Vec<_>>(),
        "file sets differ"
    );
    for (path, bytes) in &expected_files {
        assert!(actual_files[path] == *bytes, "content differs for {path:?}");
    }
}

/// Record every event published on the manager's bus
pub fn record_events(manager: &TaskManager) -> Arc<Mutex<Vec<TaskEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    manager.events().subscribe_any(move |_, event: &TaskEvent| {
        sink.lock().expect("event log lock").push(event.clone());
    });
    log
}
