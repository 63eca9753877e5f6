//! Archive format detection from leading magic bytes

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Bytes needed to see every signature we know (tar's `ustar` ends at 262)
const SNIFF_LEN: usize = 262;
const TAR_MAGIC_OFFSET: usize = 257;

/// Container format recognised from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedFormat {
    /// `PK` local file header
    Zip,
    /// gzip stream (assumed to wrap a tar archive)
    Gzip,
    /// POSIX/GNU tar (`ustar` at offset 257)
    Tar,
}

/// Classify a file header
///
/// Only the first 10 bytes are checked for zip/gzip; tar needs 262.
pub fn detect_format(header: &[u8]) -> Option<DetectedFormat> {
    let head = &header[..header.len().min(10)];
    match head {
        [0x50, 0x4B, ..] => Some(DetectedFormat::Zip),
        [0x1F, 0x8B, ..] => Some(DetectedFormat::Gzip),
        _ if header.len() >= SNIFF_LEN && &header[TAR_MAGIC_OFFSET..SNIFF_LEN] == b"ustar" => {
            Some(DetectedFormat::Tar)
        }
        _ => None,
    }
}

/// Read the start of `path` and classify it
///
/// # Errors
///
/// [`Error::UnknownFormat`] when no signature matches; I/O errors if the file
/// cannot be read.
pub async fn sniff_format(path: &Path) -> Result<DetectedFormat> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    (&mut file)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)
        .await?;

    let format = detect_format(&header).ok_or_else(|| Error::UnknownFormat(path.to_path_buf()))?;
    tracing::debug!(?path, ?format, "sniffed archive format");
    Ok(format)
}
