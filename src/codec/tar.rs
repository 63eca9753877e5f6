//! TAR adapter (plain and gzip-compressed) built on `tar` and `flate2`

use super::pipeline::{ExtractionStats, run_extraction};
use super::walk::{EntryKind, SourceEntry, collect_entries};
use super::{
    ArchiveAdapter, Capability, CompressOptions, DecompressOptions, DetectedFormat, join_error,
};
use crate::error::{Error, Result};
use crate::progress::{CountingReader, ProgressTracker};
use crate::size_estimator::estimate_directory_size;
use crate::utils::enclosed_path;
use ::tar::{Archive, Builder, Header};
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Streams directories into and out of tar archives
///
/// Output is gzip-compressed unless the file name ends in `.tar`. Input
/// compression is detected from the stream, not the name.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzAdapter;

#[async_trait]
impl ArchiveAdapter for TarGzAdapter {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn capability(&self) -> Capability {
        Capability::Both
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".tar.gz", ".tgz", ".tar"]
    }

    fn signatures(&self) -> &'static [DetectedFormat] {
        &[DetectedFormat::Gzip, DetectedFormat::Tar]
    }

    async fn compress(
        &self,
        source_dir: &Path,
        output_path: &Path,
        options: CompressOptions,
    ) -> Result<()> {
        let total = estimate_directory_size(source_dir, options.size_estimate_depth).await;
        let source = source_dir.to_path_buf();
        let output = output_path.to_path_buf();

        tokio::task::spawn_blocking(move || write_tar(&source, &output, &options, total))
            .await
            .map_err(join_error)?
    }

    async fn decompress(
        &self,
        archive: &Path,
        destination: &Path,
        options: DecompressOptions,
    ) -> Result<Vec<PathBuf>> {
        let (files, _) = extract_tar(archive, destination, options).await?;
        Ok(files)
    }
}

fn write_tar(source: &Path, output: &Path, options: &CompressOptions, total: u64) -> Result<()> {
    let entries = collect_entries(source)?;
    let gzip = !output
        .file_name()
        .is_some_and(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(".tar"));
    debug!(?source, ?output, entries = entries.len(), total, gzip, "writing tar archive");

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(output)?);
    let mut tracker =
        ProgressTracker::new(options.progress.clone(), options.progress_interval, total);

    if gzip {
        let encoder = GzEncoder::new(file, Compression::new(options.compression_level));
        let encoder = append_entries(encoder, &entries, output, &mut tracker, options.chunk_size)?;
        encoder.finish()?.flush()?;
    } else {
        append_entries(file, &entries, output, &mut tracker, options.chunk_size)?.flush()?;
    }

    tracker.finish();
    info!(?output, bytes = tracker.processed(), "tar archive written");
    Ok(())
}

fn append_entries<W: Write>(
    out: W,
    entries: &[SourceEntry],
    output: &Path,
    tracker: &mut ProgressTracker,
    chunk_size: usize,
) -> Result<W> {
    let mut builder = Builder::new(out);
    builder.follow_symlinks(false);

    for entry in entries {
        match entry.kind {
            EntryKind::Dir => {
                builder
                    .append_dir(&entry.relative, &entry.absolute)
                    .map_err(|e| Error::archive(output, e))?;
            }
            EntryKind::File => {
                let input = match File::open(&entry.absolute) {
                    Ok(input) => input,
                    Err(e) => {
                        warn!(path = ?entry.absolute, error = %e, "skipping unreadable file");
                        continue;
                    }
                };
                let meta = input.metadata()?;
                let mut header = Header::new_gnu();
                header.set_metadata(&meta);
                header.set_size(meta.len());

                let name = entry.archive_name();
                let reader = ProgressRead {
                    inner: BufReader::with_capacity(chunk_size.max(1), input).take(meta.len()),
                    tracker: &mut *tracker,
                    name: &name,
                };
                builder
                    .append_data(&mut header, &entry.relative, reader)
                    .map_err(|e| Error::archive(output, e))?;
            }
        }
    }

    builder.into_inner().map_err(|e| Error::archive(output, e))
}

/// Reports bytes pulled out of a source file while tar copies it
struct ProgressRead<'a, R> {
    inner: R,
    tracker: &'a mut ProgressTracker,
    name: &'a str,
}

impl<R: Read> Read for ProgressRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.tracker.advance(n as u64, Some(self.name));
        }
        Ok(n)
    }
}

/// Extract with a separate write budget and report pipeline stats
///
/// Progress is measured on the archive file itself (compressed bytes consumed
/// against its size), since a gzip stream does not announce its expanded size.
pub(crate) async fn extract_tar(
    archive: &Path,
    destination: &Path,
    options: DecompressOptions,
) -> Result<(Vec<PathBuf>, ExtractionStats)> {
    let archive_path = archive.to_path_buf();
    let chunk_size = options.chunk_size;
    let progress = options.progress.clone();
    let interval = options.progress_interval;

    let limit = options.max_concurrent_files;
    let (files, stats) = run_extraction(archive, destination, limit, move |sender| {
        let file = File::open(&archive_path)?;
        let total = file.metadata()?.len();
        let mut buffered = BufReader::new(file);
        let gzip = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
        let (counting, consumed) = CountingReader::new(buffered);

        let stream: Box<dyn Read> = if gzip {
            Box::new(GzDecoder::new(counting))
        } else {
            Box::new(counting)
        };
        let mut tar = Archive::new(stream);
        let mut tracker = ProgressTracker::new(progress, interval, total);

        for entry in tar.entries().map_err(|e| Error::archive(&archive_path, e))? {
            let mut entry = entry.map_err(|e| Error::archive(&archive_path, e))?;
            let raw = entry
                .path()
                .map_err(|e| Error::archive(&archive_path, e))?
                .into_owned();
            let Some(relative) = enclosed_path(&raw) else {
                warn!(archive = ?archive_path, entry = ?raw, "skipping entry with unsafe path");
                continue;
            };
            let mode = entry.header().mode().ok();
            let kind = entry.header().entry_type();

            if kind.is_dir() {
                sender.dir(relative, mode)?;
            } else if kind.is_file() {
                let name = relative.to_string_lossy().into_owned();
                sender.file(relative, mode, &mut entry, chunk_size, |_| {
                    tracker.set_processed(consumed.load(Ordering::Relaxed), Some(&name));
                })?;
            } else {
                debug!(archive = ?archive_path, entry = ?raw, ?kind, "skipping non-regular entry");
            }
        }

        tracker.set_processed(consumed.load(Ordering::Relaxed), None);
        Ok(tracker)
    })
    .await?;

    info!(?archive, ?destination, files = stats.files, "tar archive extracted");
    Ok((files, stats))
}
