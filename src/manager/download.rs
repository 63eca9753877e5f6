//! Remote downloads through the configured transport.

use super::TaskManager;
use super::lifecycle::TaskHandle;
use crate::error::Result;
use crate::transport::{FetchRequest, TransferProgress};
use crate::types::{DownloadOptions, DownloadResult, TaskPayload, TaskType};
use std::sync::Arc;

impl TaskManager {
    /// Download `url` into the download directory
    ///
    /// The file name is `file_name` when given, otherwise derived from the
    /// response. Progress details carry the transfer speed as `speed_bps`.
    ///
    /// # Errors
    ///
    /// Fails immediately only with [`Error::ShuttingDown`](crate::Error::ShuttingDown),
    /// or [`Error::Other`](crate::Error::Other) outside a tokio runtime;
    /// transport errors fail the task.
    pub fn download(
        &self,
        url: impl Into<String>,
        options: DownloadOptions,
    ) -> Result<TaskHandle<DownloadResult>> {
        let url = url.into();
        let directory = self.config.download.download_dir.clone();
        let file_name = options.file_name;

        let payload = TaskPayload::Download {
            url: url.clone(),
            file_name: file_name.clone(),
            directory: directory.clone(),
        };
        let transport = Arc::clone(&self.transport);
        self.spawn_task(
            TaskType::Download,
            payload,
            options.on_complete,
            move |progress| async move {
                let on_progress: TransferProgress = Arc::new(move |snapshot, speed_bps| {
                    let mut extra = serde_json::Map::new();
                    extra.insert("speed_bps".to_string(), speed_bps.into());
                    progress.report_with(snapshot, extra);
                });
                let request = FetchRequest {
                    url: &url,
                    directory: &directory,
                    file_name: file_name.as_deref(),
                };
                tracing::debug!(url = %url, transport = transport.name(), "starting download");
                transport.fetch(request, Some(on_progress)).await
            },
        )
    }
}
