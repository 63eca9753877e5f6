//! Approximate directory size for progress denominators
//!
//! The walk is breadth-first and stops descending below `max_depth`, so its
//! cost stays bounded on very deep trees. Files below that depth are simply not
//! counted. The result is only good for computing a percentage and must never
//! be used to size allocations.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default depth of the estimate walk
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Sum the sizes of regular files up to `max_depth` levels below `root`
///
/// Depth 0 counts only the files directly inside `root`. Unreadable
/// directories are skipped. A missing root yields 0.
pub async fn estimate_directory_size(root: &Path, max_depth: usize) -> u64 {
    let mut total: u64 = 0;
    let mut files: u64 = 0;
    let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
    queue.push_back((root.to_path_buf(), 0));

    while let Some((dir, depth)) = queue.pop_front() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(?dir, error = %e, "skipping unreadable directory during size estimate");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(?dir, error = %e, "failed to read directory entry during size estimate");
                    break;
                }
            };

            // symlink_metadata: do not follow links out of the tree
            let Ok(meta) = tokio::fs::symlink_metadata(entry.path()).await else {
                continue;
            };
            if meta.is_file() {
                total = total.saturating_add(meta.len());
                files += 1;
            } else if meta.is_dir() && depth < max_depth {
                queue.push_back((entry.path(), depth + 1));
            }
        }
    }

    debug!(?root, max_depth, files, total_bytes = total, "estimated directory size");
    total
}
