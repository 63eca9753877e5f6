//! Download transports
//!
//! The task manager only needs a byte stream written to disk and a running
//! byte count. [`Transport`] is that seam; [`HttpTransport`] is the built-in
//! implementation on top of `reqwest`, with retry for transient failures.

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::progress::ProgressThrottle;
use crate::retry::with_retry;
use crate::types::{DownloadResult, ProgressSnapshot};
use crate::utils::{filename_from_response, sanitize_filename};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Receives download progress together with the current speed in bytes/second
pub type TransferProgress = Arc<dyn Fn(ProgressSnapshot, u64) + Send + Sync>;

/// What to fetch and where to put it
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Source URL
    pub url: &'a str,
    /// Directory receiving the file
    pub directory: &'a Path,
    /// Requested file name; when absent the transport derives one
    pub file_name: Option<&'a str>,
}

/// Source of downloaded bytes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Stream `request.url` into `request.directory`
    ///
    /// # Errors
    ///
    /// Transport-specific failures surface as [`Error::Transport`] or
    /// [`Error::Network`]; local write failures as [`Error::Io`].
    async fn fetch(
        &self,
        request: FetchRequest<'_>,
        progress: Option<TransferProgress>,
    ) -> Result<DownloadResult>;
}

/// HTTP(S) downloads with streaming writes and retry
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryConfig,
    progress_interval: Duration,
}

impl HttpTransport {
    /// Build a client from the download settings
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &DownloadConfig, progress_interval: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry: config.retry.clone(),
            progress_interval,
        })
    }

    async fn fetch_once(
        &self,
        request: FetchRequest<'_>,
        progress: Option<&TransferProgress>,
    ) -> Result<DownloadResult> {
        let mut response = self.client.get(request.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::http_status(status, request.url));
        }

        let name = match request.file_name {
            Some(name) => sanitize_filename(name),
            None => sanitize_filename(&filename_from_response(&response, request.url)),
        };
        tokio::fs::create_dir_all(request.directory).await?;
        let target = request.directory.join(&name);
        let partial = partial_path(&target);
        let total = response.content_length().unwrap_or(0);
        debug!(url = request.url, ?target, total, "streaming download");

        let streamed = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let throttle = ProgressThrottle::new(self.progress_interval);
            let started = Instant::now();
            let mut written: u64 = 0;

            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                if let Some(progress) = progress
                    && throttle.try_acquire()
                {
                    progress(
                        ProgressSnapshot::from_bytes(written, total, Some(name.clone())),
                        speed(written, started),
                    );
                }
            }
            file.flush().await?;
            drop(file);

            if let Some(progress) = progress {
                progress(ProgressSnapshot::finished(written, total), speed(written, started));
            }
            Ok::<_, Error>(written)
        }
        .await;

        let written = match streamed {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(?partial, error = %cleanup, "no partial download to remove");
                }
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &target).await?;

        Ok(DownloadResult {
            file_path: target,
            size: written,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(
        &self,
        request: FetchRequest<'_>,
        progress: Option<TransferProgress>,
    ) -> Result<DownloadResult> {
        let this = self;
        let progress = progress.as_ref();
        let result = with_retry(&self.retry, move || this.fetch_once(request, progress)).await;
        match &result {
            Ok(done) => info!(
                url = request.url,
                path = ?done.file_path,
                bytes = done.size,
                "download finished"
            ),
            Err(e) => warn!(url = request.url, error = %e, "download failed"),
        }
        result
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

fn speed(bytes: u64, started: Instant) -> u64 {
    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}
