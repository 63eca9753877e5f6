//! Bounded-concurrency extraction shared by the archive adapters
//!
//! Archive readers are synchronous and sequential, so each adapter runs its
//! reader on a blocking thread. The reader sends an [`Entry`] per archive member
//! over a small channel; file contents follow as chunks on a per-entry bounded
//! channel. On the async side, [`ExtractionPipeline`] gates every file entry on
//! a semaphore permit before spawning its writer, so no more than
//! `max_concurrent_files` output files are open at once. Writers that fall
//! behind fill their chunk channel, which blocks the reader thread.
//!
//! Extraction is complete only when the reader has returned *and* every writer
//! has been joined.
//!
//! An archive may carry the same path more than once. Writers for one target
//! run in archive order, so the last entry wins.

use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Chunks buffered per file between the reader thread and its writer
pub(crate) const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// An archive member announced by the reader thread
pub(crate) enum Entry {
    Dir {
        path: PathBuf,
        mode: Option<u32>,
    },
    File {
        path: PathBuf,
        mode: Option<u32>,
        chunks: mpsc::Receiver<Vec<u8>>,
    },
}

/// Reader-thread side of the pipeline
pub(crate) struct EntrySender {
    entries: mpsc::Sender<Entry>,
    archive: PathBuf,
}

impl EntrySender {
    /// Announce a directory
    pub fn dir(&self, path: PathBuf, mode: Option<u32>) -> Result<()> {
        self.entries
            .blocking_send(Entry::Dir { path, mode })
            .map_err(|_| self.closed())
    }

    /// Announce a file and stream its contents from `reader`
    ///
    /// Blocks while the writer is behind. Progress is reported through
    /// `on_chunk` with the number of bytes just read.
    pub fn file(
        &self,
        path: PathBuf,
        mode: Option<u32>,
        reader: &mut dyn std::io::Read,
        chunk_size: usize,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        self.entries
            .blocking_send(Entry::File {
                path,
                mode,
                chunks: rx,
            })
            .map_err(|_| self.closed())?;

        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| Error::archive(&self.archive, e))?;
            if n == 0 {
                return Ok(());
            }
            tx.blocking_send(buf[..n].to_vec()).map_err(|_| self.closed())?;
            on_chunk(n as u64);
        }
    }

    fn closed(&self) -> Error {
        Error::archive(&self.archive, "extraction aborted while streaming entries")
    }
}

/// Counts of one extraction, used for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExtractionStats {
    pub files: usize,
    pub dirs: usize,
    pub peak_concurrent_writes: usize,
}

/// Async side of the pipeline: creates directories and drives file writers
pub(crate) struct ExtractionPipeline {
    destination: PathBuf,
    limit: Arc<Semaphore>,
    writers: JoinSet<Result<()>>,
    /// Completion signal of the latest writer per target
    last_writer: HashMap<PathBuf, oneshot::Receiver<()>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    files: Vec<PathBuf>,
    dir_modes: Vec<(PathBuf, u32)>,
    dirs: usize,
}

impl ExtractionPipeline {
    /// A pipeline writing below `destination` with its own write budget
    pub fn new(destination: &Path, max_concurrent_files: usize) -> Self {
        Self {
            destination: destination.to_path_buf(),
            limit: Arc::new(Semaphore::new(max_concurrent_files.max(1))),
            writers: JoinSet::new(),
            last_writer: HashMap::new(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            files: Vec::new(),
            dir_modes: Vec::new(),
            dirs: 0,
        }
    }

    /// Open the channel the reader thread announces entries on
    pub fn channel(archive: &Path) -> (EntrySender, mpsc::Receiver<Entry>) {
        let (tx, rx) = mpsc::channel(1);
        (
            EntrySender {
                entries: tx,
                archive: archive.to_path_buf(),
            },
            rx,
        )
    }

    /// Handle one entry; waits for a write slot if all are busy
    pub async fn dispatch(&mut self, entry: Entry) -> Result<()> {
        match entry {
            Entry::Dir { path, mode } => {
                let target = self.destination.join(&path);
                tokio::fs::create_dir_all(&target).await?;
                if let Some(mode) = mode {
                    // applied after all writers finish so read-only dirs stay writable meanwhile
                    self.dir_modes.push((target, mode));
                }
                self.dirs += 1;
            }
            Entry::File { path, mode, chunks } => {
                let permit = self
                    .limit
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(format!("write limiter closed: {e}")))?;

                let target = self.destination.join(&path);
                let (done_tx, done_rx) = oneshot::channel();
                let previous = self.last_writer.insert(target.clone(), done_rx);
                let active = self.active.clone();
                let peak = self.peak.clone();
                if previous.is_none() {
                    self.files.push(path);
                }

                self.writers.spawn(async move {
                    if let Some(previous) = previous {
                        // sender dropped means the earlier writer is gone either way
                        previous.await.ok();
                    }
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let result = write_file(&target, mode, chunks).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    done_tx.send(()).ok();
                    drop(permit);
                    result
                });
            }
        }
        Ok(())
    }

    /// Join every writer, then apply directory permissions
    ///
    /// Returns the extracted file paths relative to the destination in archive
    /// order. The first writer error wins.
    pub async fn finish(mut self) -> Result<(Vec<PathBuf>, ExtractionStats)> {
        let mut first_error = None;
        while let Some(joined) = self.writers.join_next().await {
            let outcome = joined.map_err(super::join_error).and_then(|r| r);
            if let Err(e) = outcome
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        // deepest first, so a read-only parent does not block its children
        self.dir_modes
            .sort_by_key(|(p, _)| std::cmp::Reverse(p.components().count()));
        for (dir, mode) in &self.dir_modes {
            apply_mode(dir, *mode).await;
        }

        let stats = ExtractionStats {
            files: self.files.len(),
            dirs: self.dirs,
            peak_concurrent_writes: self.peak.load(Ordering::SeqCst),
        };
        debug!(destination = ?self.destination, ?stats, "extraction finished");
        Ok((self.files, stats))
    }

    /// Currently running writers
    #[cfg(test)]
    pub fn active_writes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

async fn write_file(
    target: &Path,
    mode: Option<u32>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(target).await?;
    while let Some(chunk) = chunks.recv().await {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    if let Some(mode) = mode {
        apply_mode(target, mode).await;
    }
    Ok(())
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
    if let Err(e) = tokio::fs::set_permissions(path, permissions).await {
        warn!(?path, mode = %format_args!("{mode:o}"), error = %e, "failed to apply permissions");
    }
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) {}

/// Drive a blocking archive reader into a pipeline and wait for both sides
///
/// `read` runs on a blocking thread and returns its progress tracker so the
/// final 100% report is emitted only after every writer has finished.
pub(crate) async fn run_extraction<F>(
    archive: &Path,
    destination: &Path,
    max_concurrent_files: usize,
    read: F,
) -> Result<(Vec<PathBuf>, ExtractionStats)>
where
    F: FnOnce(EntrySender) -> Result<ProgressTracker> + Send + 'static,
{
    tokio::fs::create_dir_all(destination).await?;

    let (sender, mut entries) = ExtractionPipeline::channel(archive);
    let reader = tokio::task::spawn_blocking(move || read(sender));

    let mut pipeline = ExtractionPipeline::new(destination, max_concurrent_files);
    let mut dispatch_error = None;
    while let Some(entry) = entries.recv().await {
        if let Err(e) = pipeline.dispatch(entry).await {
            dispatch_error = Some(e);
            break;
        }
    }
    // closing the receiver unblocks a reader stuck on a full channel
    drop(entries);

    let read_result = reader.await.map_err(super::join_error)?;
    let written = pipeline.finish().await;

    if let Some(e) = dispatch_error {
        return Err(e);
    }
    let (files, stats) = written?;
    let mut tracker = read_result?;
    tracker.finish();
    Ok((files, stats))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn file_entry(name: &str) -> (mpsc::Sender<Vec<u8>>, Entry) {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let entry = Entry::File {
            path: PathBuf::from(name),
            mode: None,
            chunks: rx,
        };
        (tx, entry)
    }

    #[tokio::test]
    async fn dispatch_waits_for_a_free_write_slot() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = ExtractionPipeline::new(dir.path(), 2);

        let (first, entry) = file_entry("a.txt");
        pipeline.dispatch(entry).await.unwrap();
        let (_second, entry) = file_entry("b.txt");
        pipeline.dispatch(entry).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pipeline.active_writes(), 2);

        let (_third, entry) = file_entry("c.txt");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), pipeline.dispatch(entry))
                .await
                .is_err(),
            "a third writer must not start while two are open"
        );

        first.send(b"done".to_vec()).await.unwrap();
        drop(first);
        let (fourth, entry) = file_entry("d.txt");
        tokio::time::timeout(Duration::from_secs(5), pipeline.dispatch(entry))
            .await
            .expect("slot should free up once a writer finishes")
            .unwrap();

        drop(fourth);
        drop(_second);
        let (files, stats) = pipeline.finish().await.unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b.txt"),
                PathBuf::from("d.txt")
            ]
        );
        assert_eq!(stats.peak_concurrent_writes, 2);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"done");
    }

    #[tokio::test]
    async fn extraction_joins_all_writers_before_returning() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let data = payload.clone();

        let (files, stats) = run_extraction(Path::new("fake.zip"), dir.path(), 3, move |sender| {
            sender.dir(PathBuf::from("nested"), None)?;
            for i in 0..20 {
                let mut reader: &[u8] = &data;
                let name = PathBuf::from(format!("nested/f{i:02}.bin"));
                sender.file(name, None, &mut reader, 64, |_| {})?;
            }
            Ok(ProgressTracker::new(None, Duration::ZERO, 0))
        })
        .await
        .unwrap();

        assert_eq!(files.len(), 20);
        assert_eq!(stats.dirs, 1);
        assert!(stats.peak_concurrent_writes >= 1);
        assert!(
            stats.peak_concurrent_writes <= 3,
            "peak was {}",
            stats.peak_concurrent_writes
        );
        for file in &files {
            let written = std::fs::read(dir.path().join(file)).unwrap();
            assert_eq!(written, payload, "{file:?} truncated");
        }
    }

    #[tokio::test]
    async fn writer_failure_wins_over_reader_abort() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("clash")).unwrap();

        let result = run_extraction(Path::new("fake.tar"), dir.path(), 2, |sender| {
            let data = vec![1u8; 4096];
            let mut reader: &[u8] = &data;
            sender.file(PathBuf::from("clash"), None, &mut reader, 16, |_| {})?;
            Ok(ProgressTracker::new(None, Duration::ZERO, 0))
        })
        .await;

        assert!(matches!(result, Err(Error::Io(_))), "{result:?}");
    }

    #[tokio::test]
    async fn reader_failure_fails_extraction() {
        let dir = TempDir::new().unwrap();
        let result = run_extraction(Path::new("broken.zip"), dir.path(), 2, |_sender| {
            Err(Error::archive("broken.zip", "invalid central directory"))
        })
        .await;
        assert!(matches!(result, Err(Error::Archive { .. })), "{result:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn applies_stored_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        run_extraction(Path::new("perm.tar"), dir.path(), 2, |sender| {
            sender.dir(PathBuf::from("bin"), Some(0o750))?;
            let mut reader: &[u8] = b"#!/bin/sh\n";
            sender.file(PathBuf::from("bin/run.sh"), Some(0o755), &mut reader, 8, |_| {})?;
            let mut reader: &[u8] = b"secret";
            sender.file(PathBuf::from("key"), Some(0o600), &mut reader, 8, |_| {})?;
            Ok(ProgressTracker::new(None, Duration::ZERO, 0))
        })
        .await
        .unwrap();

        let mode = |p: &str| {
            std::fs::metadata(dir.path().join(p))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode("bin"), 0o750);
        assert_eq!(mode("bin/run.sh"), 0o755);
        assert_eq!(mode("key"), 0o600);
    }
}
