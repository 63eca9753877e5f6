//! Utility functions for file naming and path handling

use crate::types::ArchiveFormat;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Component, Path, PathBuf};

/// Suffixes tried before giving up on a free output name
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Name used when sanitizing leaves nothing behind
pub const FALLBACK_FILENAME: &str = "unnamed";

/// Reduce a file name to `[A-Za-z0-9._-]`
///
/// Every other character becomes `_`, runs of `_` collapse into one, and
/// leading/trailing dots are trimmed. An empty result falls back to
/// [`FALLBACK_FILENAME`].
///
/// # Examples
///
/// ```
/// use archive_tasks::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("my photos (2024).zip"), "my_photos_2024_.zip");
/// assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
/// assert_eq!(sanitize_filename("..."), "unnamed");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('.');
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// ISO-8601 timestamp usable in file names (colons replaced by dashes)
#[must_use]
pub fn filename_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-")
}

/// Default archive name: `{sanitized-basename}-{timestamp}{extension}`
///
/// # Examples
///
/// ```
/// use archive_tasks::types::ArchiveFormat;
/// use archive_tasks::utils::default_archive_name;
/// use chrono::{TimeZone, Utc};
/// use std::path::Path;
///
/// let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// assert_eq!(
///     default_archive_name(Path::new("/home/me/My Docs"), ArchiveFormat::Zip, now),
///     "My_Docs-2024-03-09T14-05-07.000Z.zip"
/// );
/// ```
#[must_use]
pub fn default_archive_name(source: &Path, format: ArchiveFormat, now: DateTime<Utc>) -> String {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{}-{}{}",
        sanitize_filename(&base),
        filename_timestamp(now),
        format.extension()
    )
}

/// Sanitize a requested archive name and make sure it ends with the format's extension
#[must_use]
pub fn archive_filename(requested: &str, format: ArchiveFormat) -> String {
    let name = sanitize_filename(requested);
    let ext = format.extension();
    if name.to_ascii_lowercase().ends_with(ext) {
        name
    } else {
        format!("{name}{ext}")
    }
}

/// File name of an archive without its archive extension(s)
///
/// Handles double extensions such as `.tar.gz`.
///
/// # Examples
///
/// ```
/// use archive_tasks::utils::archive_stem;
/// use std::path::Path;
///
/// assert_eq!(archive_stem(Path::new("/b/site-2024.tar.gz")), "site-2024");
/// assert_eq!(archive_stem(Path::new("photos.ZIP")), "photos");
/// assert_eq!(archive_stem(Path::new("README")), "README");
/// ```
#[must_use]
pub fn archive_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    for ext in [".tar.gz", ".tgz", ".tar", ".zip", ".gz"] {
        if lower.ends_with(ext) && lower.len() > ext.len() {
            return name[..name.len() - ext.len()].to_string();
        }
    }
    name
}

/// Claim `path`, or the first free `{stem}-{n}{extension}` next to it
///
/// The chosen file is created empty with `create_new`, so callers racing for
/// the same name always end up with different files. Archive double
/// extensions such as `.tar.gz` are kept intact.
///
/// # Errors
///
/// Returns the I/O error of the first attempt that fails for a reason other
/// than the file already existing, or `AlreadyExists` once every suffix is
/// taken.
pub fn reserve_unique_path(path: &Path) -> std::io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = archive_stem(path);
    let extension = &name[stem.len()..];
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for attempt in 0..=MAX_RENAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            path.to_path_buf()
        } else {
            parent.join(format!("{stem}-{attempt}{extension}"))
        };
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "no free name for {} after {MAX_RENAME_ATTEMPTS} attempts",
            path.display()
        ),
    ))
}

/// Relative entry path that stays inside the extraction root
///
/// Returns `None` for absolute paths, `..` components, or empty paths.
#[must_use]
pub fn enclosed_path(entry: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Extract a file name from an HTTP response, falling back to the URL
///
/// Tries `Content-Disposition` (`filename=` and RFC 5987 `filename*=`), then
/// the last non-empty URL path segment, then `download`. The result is not
/// sanitized.
pub fn filename_from_response(response: &reqwest::Response, url: &str) -> String {
    if let Some(content_disposition) = response.headers().get(reqwest::header::CONTENT_DISPOSITION)
        && let Ok(value) = content_disposition.to_str()
        && let Some(name) = filename_from_content_disposition(value)
    {
        return name;
    }
    filename_from_url(url).unwrap_or_else(|| "download".to_string())
}

fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'percent-encoded-name
            if let Some(idx) = encoded.rfind('\'')
                && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }
    plain
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    Some(
        urlencoding::decode(last)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last.to_string()),
    )
}
