//! Directory trees used as backup sources

use std::path::{Path, PathBuf};

/// `site/file1.txt` ("Content 1") and `site/subdir/nested1.txt` ("Nested 1")
pub fn sample_tree(root: &Path) -> PathBuf {
    let site = root.join("site");
    std::fs::create_dir_all(site.join("subdir")).expect("create sample tree");
    std::fs::write(site.join("file1.txt"), "Content 1").expect("write file1");
    std::fs::write(site.join("subdir/nested1.txt"), "Nested 1").expect("write nested1");
    site
}

/// Sample tree plus a few larger, non-repeating files
pub fn mixed_tree(root: &Path) -> PathBuf {
    let site = sample_tree(root);
    std::fs::create_dir_all(site.join("media/raw")).expect("create media dirs");
    std::fs::create_dir_all(site.join("empty")).expect("create empty dir");
    for (name, len) in [("media/a.bin", 96 * 1024), ("media/raw/b.bin", 300 * 1024)] {
        let bytes: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        std::fs::write(site.join(name), bytes).expect("write binary fixture");
    }
    site
}

/// Directory holding `count` small files named `file-NNN.txt`
pub fn many_files_tree(root: &Path, count: usize) -> PathBuf {
    let dir = root.join("many");
    std::fs::create_dir_all(&dir).expect("create many dir");
    for i in 0..count {
        std::fs::write(dir.join(format!("file-{i:03}.txt")), format!("file number {i}"))
            .expect("write small file");
    }
    dir
}
