//! Shared end-to-end test scaffolding: a disposable local root and a
//! filesystem-backed remote store standing in for the real cloud API.

use camino::Utf8PathBuf;
use walkdir::WalkDir;

use piledriver::remote::fs_store::FsStore;

pub fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::try_from(p).expect("tempdir paths are UTF-8 on test hosts")
}

/// Every regular file under `dir`, relative to it. Used to assert a
/// reconciled remote's file set matches what's actually on disk.
pub fn relative_files_in(dir: &std::path::Path) -> Vec<Utf8PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .map(|e| e.expect("couldn't walk dir"))
        .filter(|e| e.file_type().is_file())
        .map(|e| utf8(e.path().strip_prefix(dir).unwrap().to_owned()))
        .collect()
}

/// A fresh local directory and a fresh filesystem-backed remote, both
/// disposed of when the returned `TempDir`s drop.
pub struct Fixture {
    pub local_dir: tempfile::TempDir,
    pub remote_dir: tempfile::TempDir,
    pub store: FsStore,
}

pub fn fixture() -> Fixture {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(utf8(remote_dir.path().to_owned())).unwrap();
    Fixture { local_dir, remote_dir, store }
}

impl Fixture {
    pub fn local_path(&self, rel: &str) -> Utf8PathBuf {
        utf8(self.local_dir.path().join(rel))
    }
}
