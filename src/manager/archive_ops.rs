//! Backup, restore and unpack operations.

use super::TaskManager;
use super::lifecycle::TaskHandle;
use crate::codec::{CompressOptions, DecompressOptions, Operation};
use crate::error::{Error, Result};
use crate::types::{
    ArchiveFormat, BackupOptions, BackupResult, RestoreOptions, RestoreResult, TaskPayload,
    TaskType, UnpackOptions, UnpackResult,
};
use crate::utils::{
    archive_filename, archive_stem, default_archive_name, reserve_unique_path, sanitize_filename,
};
use chrono::Utc;
use std::path::{Path, PathBuf};

impl TaskManager {
    /// Archive `source_dir` into the backup directory
    ///
    /// The archive is a ZIP or a `.tar.gz` depending on `use_zip` (default
    /// `archive.prefer_zip`). Without `output_filename` it is named
    /// `{source}-{timestamp}{ext}`. An existing file is never overwritten: the
    /// name gets a `-N` suffix instead, and the output file is claimed before
    /// the task starts, so concurrent backups always write distinct archives.
    ///
    /// # Errors
    ///
    /// Fails immediately with [`Error::Config`] for a compression level outside
    /// 1-9, [`Error::Io`] if the output file cannot be claimed,
    /// [`Error::ShuttingDown`] after shutdown, or [`Error::Other`] outside a
    /// tokio runtime. Everything else, including a missing source directory,
    /// fails the task instead.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use archive_tasks::{BackupOptions, Config, TaskManager};
    /// # async fn example() -> archive_tasks::Result<()> {
    /// let manager = TaskManager::new(Config::default()).await?;
    /// let handle = manager.create_backup("./site", BackupOptions::default())?;
    /// println!("backup task {}", handle.id());
    /// let backup = handle.await?;
    /// println!("wrote {} bytes to {:?}", backup.size, backup.backup_path);
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_backup(
        &self,
        source_dir: impl AsRef<Path>,
        options: BackupOptions,
    ) -> Result<TaskHandle<BackupResult>> {
        let source = source_dir.as_ref().to_path_buf();
        let format = if options.use_zip.unwrap_or(self.config.archive.prefer_zip) {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarGz
        };
        let level = options
            .compression_level
            .unwrap_or(self.config.archive.compression_level);
        if !(1..=9).contains(&level) {
            return Err(Error::Config {
                message: format!("compression level must be between 1 and 9, got {level}"),
                key: Some("compression_level".to_string()),
            });
        }
        let file_name = match options.output_filename.as_deref() {
            Some(requested) => archive_filename(requested, format),
            None => default_archive_name(&source, format, Utc::now()),
        };
        let output = reserve_unique_path(&self.config.storage.backup_dir.join(file_name))?;

        let payload = TaskPayload::Backup {
            source_dir: source.clone(),
            output_path: output.clone(),
            compression_level: level,
            format,
        };
        let manager = self.clone();
        let claimed = output.clone();
        let spawned = self.spawn_task(
            TaskType::Compress,
            payload,
            options.on_complete,
            move |progress| async move {
                let adapter = match manager.adapters.resolve(&output, Operation::Compress).await {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        remove_partial(&output).await;
                        return Err(e);
                    }
                };
                tracing::debug!(adapter = adapter.name(), ?source, ?output, level, "compressing");

                let options = CompressOptions::from_config(&manager.config.archive)
                    .with_level(level)
                    .with_progress(progress.callback());
                if let Err(e) = adapter.compress(&source, &output, options).await {
                    remove_partial(&output).await;
                    return Err(e);
                }

                let size = tokio::fs::metadata(&output).await?.len();
                Ok(BackupResult {
                    backup_path: output,
                    size,
                })
            },
        );
        if spawned.is_err() {
            // never started, so the claimed name is released again
            std::fs::remove_file(&claimed).ok();
        }
        spawned
    }

    /// Restore an archive into a folder of the restore directory
    ///
    /// The folder is named after `destination_folder_name`, or after the
    /// archive without its extension.
    ///
    /// # Errors
    ///
    /// Fails immediately only with [`Error::ShuttingDown`], or [`Error::Other`]
    /// outside a tokio runtime; extraction errors fail the task.
    pub fn restore_backup(
        &self,
        archive_path: impl AsRef<Path>,
        options: RestoreOptions,
    ) -> Result<TaskHandle<RestoreResult>> {
        let archive = archive_path.as_ref().to_path_buf();
        let folder = match options.destination_folder_name.as_deref() {
            Some(name) => sanitize_filename(name),
            None => sanitize_filename(&archive_stem(&archive)),
        };
        let destination = self.config.storage.restore_dir.join(folder);

        let payload = TaskPayload::Restore {
            archive_path: archive.clone(),
            destination: destination.clone(),
        };
        let manager = self.clone();
        self.spawn_task(
            TaskType::Decompress,
            payload,
            options.on_complete,
            move |progress| async move {
                let files = manager
                    .extract(&archive, &destination, progress.callback())
                    .await?;
                tracing::debug!(?archive, ?destination, files = files.len(), "backup restored");
                Ok(RestoreResult {
                    destination_path: destination,
                })
            },
        )
    }

    /// Extract an archive, next to it by default
    ///
    /// Like [`restore_backup`](TaskManager::restore_backup), but the
    /// destination is free and the archive can be removed afterwards. The
    /// result lists the extracted files relative to the destination.
    ///
    /// # Errors
    ///
    /// Fails immediately only with [`Error::ShuttingDown`], or [`Error::Other`]
    /// outside a tokio runtime; extraction errors fail the task.
    pub fn unpack(
        &self,
        archive_path: impl AsRef<Path>,
        options: UnpackOptions,
    ) -> Result<TaskHandle<UnpackResult>> {
        let archive = archive_path.as_ref().to_path_buf();
        let destination = options
            .destination
            .unwrap_or_else(|| default_unpack_dir(&archive));
        let delete_after_unpack = options.delete_after_unpack;

        let payload = TaskPayload::Unpack {
            archive_path: archive.clone(),
            destination: destination.clone(),
            delete_after_unpack,
        };
        let manager = self.clone();
        self.spawn_task(
            TaskType::Unpack,
            payload,
            options.on_complete,
            move |progress| async move {
                let files = manager
                    .extract(&archive, &destination, progress.callback())
                    .await?;

                if delete_after_unpack {
                    match tokio::fs::remove_file(&archive).await {
                        Ok(()) => tracing::info!(?archive, "deleted archive after unpacking"),
                        Err(e) => tracing::warn!(
                            ?archive,
                            error = %e,
                            "failed to delete archive after unpacking"
                        ),
                    }
                }

                Ok(UnpackResult {
                    unpack_dir: destination,
                    files: Some(files),
                })
            },
        )
    }

    async fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        progress: crate::progress::ProgressCallback,
    ) -> Result<Vec<PathBuf>> {
        let adapter = self.adapters.resolve(archive, Operation::Decompress).await?;
        tracing::debug!(adapter = adapter.name(), ?archive, ?destination, "decompressing");
        let options = DecompressOptions::from_config(&self.config.archive).with_progress(progress);
        adapter.decompress(archive, destination, options).await
    }
}

fn default_unpack_dir(archive: &Path) -> PathBuf {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    parent.join(sanitize_filename(&archive_stem(archive)))
}

async fn remove_partial(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(?output, error = %e, "failed to remove incomplete archive");
    }
}
