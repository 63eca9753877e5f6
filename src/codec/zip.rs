//! ZIP adapter built on the `zip` crate

use super::pipeline::{ExtractionStats, run_extraction};
use super::walk::{EntryKind, collect_entries};
use super::{
    ArchiveAdapter, Capability, CompressOptions, DecompressOptions, DetectedFormat, join_error,
};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::size_estimator::estimate_directory_size;
use crate::utils::enclosed_path;
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use ::zip::write::FileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Streams directories into and out of `.zip` archives
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipAdapter;

#[async_trait]
impl ArchiveAdapter for ZipAdapter {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn capability(&self) -> Capability {
        Capability::Both
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".zip"]
    }

    fn signatures(&self) -> &'static [DetectedFormat] {
        &[DetectedFormat::Zip]
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

        tokio::task::spawn_blocking(move || write_zip(&source, &output, &options, total))
            .await
            .map_err(join_error)?
    }

    async fn decompress(
        &self,
        archive: &Path,
        destination: &Path,
        options: DecompressOptions,
    ) -> Result<Vec<PathBuf>> {
        let (files, _) = extract_zip(archive, destination, options).await?;
        Ok(files)
    }
}

fn write_zip(source: &Path, output: &Path, options: &CompressOptions, total: u64) -> Result<()> {
    let entries = collect_entries(source)?;
    debug!(?source, ?output, entries = entries.len(), total, "writing zip archive");

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(output)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let mut tracker =
        ProgressTracker::new(options.progress.clone(), options.progress_interval, total);
    let mut buf = vec![0u8; options.chunk_size.max(1)];

    for entry in &entries {
        let name = entry.archive_name();
        let entry_options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(options.compression_level as i32))
            .unix_permissions(entry.mode)
            .large_file(entry.len >= u64::from(u32::MAX));

        match entry.kind {
            EntryKind::Dir => {
                writer
                    .add_directory(name, entry_options)
                    .map_err(|e| Error::archive(output, e))?;
            }
            EntryKind::File => {
                let mut input = match File::open(&entry.absolute) {
                    Ok(input) => input,
                    Err(e) => {
                        warn!(path = ?entry.absolute, error = %e, "skipping unreadable file");
                        continue;
                    }
                };
                writer
                    .start_file(name.as_str(), entry_options)
                    .map_err(|e| Error::archive(output, e))?;
                loop {
                    let n = input.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    writer.write_all(&buf[..n])?;
                    tracker.advance(n as u64, Some(&name));
                }
            }
        }
    }

    let mut inner = writer.finish().map_err(|e| Error::archive(output, e))?;
    inner.flush()?;
    tracker.finish();
    info!(?output, bytes = tracker.processed(), "zip archive written");
    Ok(())
}

/// Extract with a separate write budget and report pipeline stats
pub(crate) async fn extract_zip(
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
        let mut zip = ZipArchive::new(file).map_err(|e| Error::archive(&archive_path, e))?;

        let mut total = 0u64;
        for i in 0..zip.len() {
            let entry = zip.by_index_raw(i).map_err(|e| Error::archive(&archive_path, e))?;
            total = total.saturating_add(entry.size());
        }
        let mut tracker = ProgressTracker::new(progress, interval, total);

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| Error::archive(&archive_path, e))?;
            let Some(relative) = entry.enclosed_name().and_then(enclosed_path) else {
                warn!(
                    archive = ?archive_path,
                    name = entry.name(),
                    "skipping entry with unsafe path"
                );
                continue;
            };
            let mode = entry.unix_mode();

            if entry.is_dir() {
                sender.dir(relative, mode)?;
            } else {
                let name = relative.to_string_lossy().into_owned();
                sender.file(relative, mode, &mut entry, chunk_size, |n| {
                    tracker.advance(n, Some(&name));
                })?;
            }
        }
        Ok(tracker)
    })
    .await?;

    info!(?archive, ?destination, files = stats.files, "zip archive extracted");
    Ok((files, stats))
}
