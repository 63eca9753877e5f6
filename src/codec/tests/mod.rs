use crate::codec::tar::extract_tar;
use crate::codec::zip::extract_zip;
use crate::codec::*;
use crate::error::Error;
use crate::progress::ProgressCallback;
use crate::types::ProgressSnapshot;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the two-file sample tree used across round-trip tests
fn sample_tree(root: &Path) {
    std::fs::create_dir_all(root.join("subdir")).unwrap();
    std::fs::write(root.join("file1.txt"), "Content 1").unwrap();
    std::fs::write(root.join("subdir/nested1.txt"), "Nested 1").unwrap();
}

/// Relative path -> content for every regular file below `root`
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

fn collecting() -> (ProgressCallback, Arc<Mutex<Vec<ProgressSnapshot>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb: ProgressCallback = Arc::new(move |s| sink.lock().unwrap().push(s));
    (cb, seen)
}

fn fast_decompress(limit: usize) -> DecompressOptions {
    DecompressOptions {
        progress: None,
        progress_interval: Duration::ZERO,
        max_concurrent_files: limit,
        chunk_size: 1024,
    }
}

/// Zip with many entries, written directly with the zip crate
fn many_entry_zip(path: &Path, entries: usize, entry_len: usize) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for i in 0..entries {
        writer.start_file(format!("data/part{i:03}.bin"), options).unwrap();
        writer.write_all(&vec![(i % 256) as u8; entry_len]).unwrap();
    }
    writer.finish().unwrap();
}

struct FakeAdapter {
    name: &'static str,
    capability: Capability,
    extensions: &'static [&'static str],
}

#[async_trait::async_trait]
impl ArchiveAdapter for FakeAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    async fn compress(&self, _: &Path, _: &Path, _: CompressOptions) -> crate::Result<()> {
        Ok(())
    }

    async fn decompress(
        &self,
        _: &Path,
        _: &Path,
        _: DecompressOptions,
    ) -> crate::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

#[test]
fn capability_support_matrix() {
    assert!(Capability::Both.supports(Operation::Compress));
    assert!(Capability::Both.supports(Operation::Decompress));
    assert!(Capability::Compress.supports(Operation::Compress));
    assert!(!Capability::Compress.supports(Operation::Decompress));
    assert!(Capability::Decompress.supports(Operation::Decompress));
    assert!(!Capability::Decompress.supports(Operation::Compress));
}

#[test]
fn default_can_handle_matches_suffix_case_insensitively() {
    assert!(ZipAdapter.can_handle(Path::new("/b/Photos.ZIP")));
    assert!(!ZipAdapter.can_handle(Path::new("/b/photos.zip.part")));
    assert!(TarGzAdapter.can_handle(Path::new("site.tar.gz")));
    assert!(TarGzAdapter.can_handle(Path::new("site.TGZ")));
    assert!(TarGzAdapter.can_handle(Path::new("site.tar")));
    assert!(!TarGzAdapter.can_handle(Path::new("/")));
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolves_builtin_adapters_by_extension() {
    let registry = AdapterRegistry::with_defaults();
    let zip = registry
        .resolve(Path::new("out.zip"), Operation::Compress)
        .await
        .unwrap();
    assert_eq!(zip.name(), "zip");
    let tar = registry
        .resolve(Path::new("out.tar.gz"), Operation::Decompress)
        .await
        .unwrap();
    assert_eq!(tar.name(), "tar");
}

#[tokio::test]
async fn unknown_extension_for_compress_has_no_adapter() {
    let registry = AdapterRegistry::with_defaults();
    match registry.resolve(Path::new("out.rar"), Operation::Compress).await {
        Err(Error::NoAdapterFound { path, operation }) => {
            assert_eq!(path, PathBuf::from("out.rar"));
            assert_eq!(operation, Operation::Compress);
        }
        Err(other) => panic!("expected NoAdapterFound, got {other:?}"),
        Ok(adapter) => panic!("unexpected adapter {}", adapter.name()),
    }
}

#[tokio::test]
async fn registered_adapter_takes_priority() {
    let registry = AdapterRegistry::with_defaults();
    registry.register(Arc::new(FakeAdapter {
        name: "custom-zip",
        capability: Capability::Both,
        extensions: &[".zip"],
    }));

    let adapter = registry
        .resolve(Path::new("a.zip"), Operation::Decompress)
        .await
        .unwrap();
    assert_eq!(adapter.name(), "custom-zip");

    let names: Vec<&str> = registry.list().iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["custom-zip", "zip", "tar"]);
}

#[tokio::test]
async fn capability_is_checked_during_resolution() {
    let registry = AdapterRegistry::new();
    registry.register(Arc::new(FakeAdapter {
        name: "read-only-7z",
        capability: Capability::Decompress,
        extensions: &[".7z"],
    }));

    assert!(
        registry
            .resolve(Path::new("x.7z"), Operation::Decompress)
            .await
            .is_ok()
    );
    assert!(matches!(
        registry.resolve(Path::new("x.7z"), Operation::Compress).await,
        Err(Error::NoAdapterFound { .. })
    ));
}

#[tokio::test]
async fn magic_bytes_resolve_misnamed_archive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("download.bin");
    many_entry_zip(&path, 1, 4);

    let adapter = AdapterRegistry::with_defaults()
        .resolve(&path, Operation::Decompress)
        .await
        .unwrap();
    assert_eq!(adapter.name(), "zip");
}

#[tokio::test]
async fn unrecognised_bytes_fail_resolution() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.bin");
    std::fs::write(&path, "plain text").unwrap();

    let result = AdapterRegistry::with_defaults()
        .resolve(&path, Operation::Decompress)
        .await;
    assert!(matches!(result, Err(Error::UnknownFormat(_))));
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zip_round_trip_preserves_tree() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    sample_tree(&source);
    std::fs::create_dir(source.join("empty")).unwrap();
    let archive = dir.path().join("backup.zip");
    let restored = dir.path().join("restored");

    ZipAdapter
        .compress(&source, &archive, CompressOptions::default())
        .await
        .unwrap();
    let mut files = ZipAdapter
        .decompress(&archive, &restored, DecompressOptions::default())
        .await
        .unwrap();
    files.sort();

    assert_eq!(
        files,
        vec![PathBuf::from("file1.txt"), PathBuf::from("subdir/nested1.txt")]
    );
    assert_eq!(snapshot(&source), snapshot(&restored));
    assert!(restored.join("empty").is_dir());
    assert_eq!(
        std::fs::read_to_string(restored.join("subdir/nested1.txt")).unwrap(),
        "Nested 1"
    );
}

#[tokio::test]
async fn tar_gz_round_trip_preserves_tree() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    sample_tree(&source);
    std::fs::write(source.join("subdir/big.bin"), vec![42u8; 300_000]).unwrap();
    let archive = dir.path().join("backup.tar.gz");
    let restored = dir.path().join("restored");

    TarGzAdapter
        .compress(&source, &archive, CompressOptions::default().with_level(9))
        .await
        .unwrap();
    assert_eq!(sniff_format(&archive).await.unwrap(), DetectedFormat::Gzip);

    let files = TarGzAdapter
        .decompress(&archive, &restored, DecompressOptions::default())
        .await
        .unwrap();
    assert_eq!(files.len(), 3);
    assert_eq!(snapshot(&source), snapshot(&restored));
}

#[tokio::test]
async fn plain_tar_output_is_uncompressed() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    sample_tree(&source);
    let archive = dir.path().join("backup.tar");
    let restored = dir.path().join("restored");

    TarGzAdapter
        .compress(&source, &archive, CompressOptions::default())
        .await
        .unwrap();
    assert_eq!(sniff_format(&archive).await.unwrap(), DetectedFormat::Tar);

    TarGzAdapter
        .decompress(&archive, &restored, DecompressOptions::default())
        .await
        .unwrap();
    assert_eq!(snapshot(&source), snapshot(&restored));
}

#[cfg(unix)]
#[tokio::test]
async fn permission_bits_survive_both_formats() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    sample_tree(&source);
    let script = source.join("run.sh");
    std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o750)).unwrap();

    let cases: [(&dyn ArchiveAdapter, &str); 2] =
        [(&ZipAdapter, "perm.zip"), (&TarGzAdapter, "perm.tar.gz")];
    for (adapter, name) in cases {
        let archive = dir.path().join(name);
        let restored = dir.path().join(format!("restored-{name}"));
        adapter
            .compress(&source, &archive, CompressOptions::default())
            .await
            .unwrap();
        adapter
            .decompress(&archive, &restored, DecompressOptions::default())
            .await
            .unwrap();
        let mode = std::fs::metadata(restored.join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750, "{name}");
    }
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn compress_missing_source_is_inaccessible() {
    let dir = TempDir::new().unwrap();
    let adapters: [&dyn ArchiveAdapter; 2] = [&ZipAdapter, &TarGzAdapter];
    for adapter in adapters {
        let result = adapter
            .compress(
                &dir.path().join("does-not-exist"),
                &dir.path().join("out.zip"),
                CompressOptions::default(),
            )
            .await;
        assert!(
            matches!(result, Err(Error::SourceInaccessible { .. })),
            "{}: {result:?}",
            adapter.name()
        );
    }
}

#[tokio::test]
async fn corrupt_zip_is_an_archive_error() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, b"PK\x03\x04 this is not really a zip").unwrap();

    let result = ZipAdapter
        .decompress(&archive, &dir.path().join("out"), DecompressOptions::default())
        .await;
    assert!(matches!(result, Err(Error::Archive { .. })), "{result:?}");
}

#[tokio::test]
async fn entries_escaping_destination_are_skipped() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("evil.zip");
    {
        let file = std::fs::File::create(&archive).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = ::zip::write::FileOptions::default();
        writer.start_file("../escaped.txt", options).unwrap();
        writer.write_all(b"gotcha").unwrap();
        writer.start_file("safe.txt", options).unwrap();
        writer.write_all(b"fine").unwrap();
        writer.finish().unwrap();
    }
    let destination = dir.path().join("out");

    let files = ZipAdapter
        .decompress(&archive, &destination, DecompressOptions::default())
        .await
        .unwrap();

    assert_eq!(files, vec![PathBuf::from("safe.txt")]);
    assert!(!dir.path().join("escaped.txt").exists());
}

// ---------------------------------------------------------------------------
// Concurrency and progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zip_extraction_respects_write_budget() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("many.zip");
    many_entry_zip(&archive, 40, 16 * 1024);

    let (files, stats) = extract_zip(&archive, &dir.path().join("out"), fast_decompress(3))
        .await
        .unwrap();

    assert_eq!(files.len(), 40);
    assert!(stats.peak_concurrent_writes >= 1);
    assert!(
        stats.peak_concurrent_writes <= 3,
        "peak {} exceeded budget",
        stats.peak_concurrent_writes
    );
    for (i, file) in files.iter().enumerate() {
        let bytes = std::fs::read(dir.path().join("out").join(file)).unwrap();
        assert_eq!(bytes, vec![(i % 256) as u8; 16 * 1024], "{file:?}");
    }
}

#[tokio::test]
async fn concurrent_extractions_have_separate_budgets() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.zip");
    let second = dir.path().join("second.zip");
    many_entry_zip(&first, 20, 8 * 1024);
    many_entry_zip(&second, 20, 8 * 1024);

    let out_a = dir.path().join("a");
    let out_b = dir.path().join("b");
    let (a, b) = tokio::join!(
        extract_zip(&first, &out_a, fast_decompress(2)),
        extract_zip(&second, &out_b, fast_decompress(2)),
    );
    let (_, stats_a) = a.unwrap();
    let (_, stats_b) = b.unwrap();
    assert!(stats_a.peak_concurrent_writes <= 2);
    assert!(stats_b.peak_concurrent_writes <= 2);
    assert_eq!(snapshot(&out_a).len(), 20);
    assert_eq!(snapshot(&out_b).len(), 20);
}

#[tokio::test]
async fn tar_extraction_respects_write_budget() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    for i in 0..25 {
        std::fs::create_dir_all(source.join(format!("d{}", i % 5))).unwrap();
        std::fs::write(source.join(format!("d{}/f{i}.bin", i % 5)), vec![i as u8; 10_000]).unwrap();
    }
    let archive = dir.path().join("many.tgz");
    TarGzAdapter
        .compress(&source, &archive, CompressOptions::default())
        .await
        .unwrap();

    let out = dir.path().join("out");
    let (files, stats) = extract_tar(&archive, &out, fast_decompress(2)).await.unwrap();
    assert_eq!(files.len(), 25);
    assert!(stats.peak_concurrent_writes <= 2);
    assert_eq!(snapshot(&source), snapshot(&out));
}

#[tokio::test]
async fn compress_progress_is_monotonic_and_finishes_at_100() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    sample_tree(&source);
    std::fs::write(source.join("large.bin"), vec![0u8; 512 * 1024]).unwrap();
    let (cb, seen) = collecting();

    let options = CompressOptions {
        progress_interval: Duration::ZERO,
        chunk_size: 8 * 1024,
        ..CompressOptions::default()
    }
    .with_progress(cb);
    ZipAdapter
        .compress(&source, &dir.path().join("p.zip"), options)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.len() > 2, "expected several reports, got {}", seen.len());
    for pair in seen.windows(2) {
        assert!(pair[1].processed_bytes >= pair[0].processed_bytes);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.processed_bytes, 512 * 1024 + 9 + 8);
}

#[tokio::test]
async fn decompress_progress_is_throttled() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("many.zip");
    many_entry_zip(&archive, 30, 4 * 1024);
    let (cb, seen) = collecting();

    let options = DecompressOptions {
        progress_interval: Duration::from_secs(3600),
        ..fast_decompress(5)
    }
    .with_progress(cb);
    ZipAdapter
        .decompress(&archive, &dir.path().join("out"), options)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2, "first report plus the final one");
    assert_eq!(seen[1].percentage, 100.0);
    assert_eq!(seen[1].total_bytes, 30 * 4 * 1024);
}

#[tokio::test]
async fn duplicate_tar_entries_keep_the_last_one() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dup.tar");
    {
        let mut builder = ::tar::Builder::new(std::fs::File::create(&archive).unwrap());
        for (byte, len) in [(b'A', 600_000usize), (b'B', 300_000)] {
            let data = vec![byte; len];
            let mut header = ::tar::Header::new_gnu();
            header.set_size(len as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "same.txt", data.as_slice()).unwrap();
        }
        builder.finish().unwrap();
    }

    for _ in 0..10 {
        let out = TempDir::new().unwrap();
        let (files, _) = extract_tar(&archive, out.path(), fast_decompress(5)).await.unwrap();
        assert_eq!(files, vec![PathBuf::from("same.txt")]);
        let written = std::fs::read(out.path().join("same.txt")).unwrap();
        assert_eq!(written.len(), 300_000);
        assert!(written.iter().all(|b| *b == b'B'));
    }
}
