//! Source traversal for compression

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Kind of a collected source entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Dir,
    File,
}

/// One entry to be written into an archive
#[derive(Debug, Clone)]
pub(crate) struct SourceEntry {
    /// Path on disk
    pub absolute: PathBuf,
    /// Path inside the archive, relative to the source root
    pub relative: PathBuf,
    pub kind: EntryKind,
    pub len: u64,
    /// Unix permission bits (0o644/0o755 on other platforms)
    pub mode: u32,
}

impl SourceEntry {
    /// Relative path with `/` separators, as stored in archives
    pub fn archive_name(&self) -> String {
        let joined = self
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match self.kind {
            EntryKind::Dir => format!("{joined}/"),
            EntryKind::File => joined,
        }
    }
}

/// Collect every directory and regular file below `root`, sorted by name
///
/// Unreadable subdirectories are logged and skipped. Symlinks are not followed
/// and not archived.
///
/// # Errors
///
/// [`Error::SourceInaccessible`] if `root` is missing or not a directory.
pub(crate) fn collect_entries(root: &Path) -> Result<Vec<SourceEntry>> {
    let meta = std::fs::metadata(root).map_err(|e| Error::SourceInaccessible {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(Error::SourceInaccessible {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for item in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                skipped += 1;
                warn!(
                    path = ?e.path(),
                    error = %e,
                    "skipping unreadable path while collecting sources"
                );
                continue;
            }
        };

        let file_type = item.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            debug!(path = ?item.path(), "skipping non-regular file");
            continue;
        };

        let meta = match item.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                skipped += 1;
                warn!(path = ?item.path(), error = %e, "skipping entry with unreadable metadata");
                continue;
            }
        };

        let Ok(relative) = item.path().strip_prefix(root) else {
            continue;
        };

        entries.push(SourceEntry {
            absolute: item.path().to_path_buf(),
            relative: relative.to_path_buf(),
            kind,
            len: if kind == EntryKind::File { meta.len() } else { 0 },
            mode: permission_bits(&meta, kind),
        });
    }

    debug!(?root, entries = entries.len(), skipped, "collected source entries");
    Ok(entries)
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata, _kind: EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata, kind: EntryKind) -> u32 {
    match kind {
        EntryKind::Dir => 0o755,
        EntryKind::File if meta.permissions().readonly() => 0o444,
        EntryKind::File => 0o644,
    }
}
