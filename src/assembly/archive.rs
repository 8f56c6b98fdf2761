use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;

/// One entry of a zip archive, fully materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub data: Bytes,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> ArchiveEntry {
        ArchiveEntry {
            path: normalize_zip_path(&path.into()),
            data: data.into(),
        }
    }
}

/// Reading and writing of zip archives, provided by the embedding build
/// tool. `write` targets a temp location; `persist` moves the finished
/// archive to its final path in one step so a failed assembly never leaves
/// partial output there.
#[async_trait]
pub trait ArchiveIo: Send + Sync {
    async fn read_entries(&self, archive: &Path) -> anyhow::Result<Vec<ArchiveEntry>>;
    async fn write(&self, target: &Path, entries: &[ArchiveEntry]) -> anyhow::Result<()>;
    async fn persist(&self, temp: &Path, target: &Path) -> anyhow::Result<()>;
}

/// Zip entry paths are normalized before grouping: backslashes become
/// forward slashes and a leading slash is dropped, so the same logical entry
/// coming from differently built archives lands in one merge group.
pub fn normalize_zip_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized.trim_start_matches('/').to_string()
}

/// In-memory archives for tests.
pub struct TransientArchiveIo {
    archives: Mutex<HashMap<PathBuf, Vec<ArchiveEntry>>>,
}

impl TransientArchiveIo {
    pub fn new() -> TransientArchiveIo {
        TransientArchiveIo {
            archives: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, archive: impl Into<PathBuf>, entries: Vec<ArchiveEntry>) {
        self.archives.lock().unwrap().insert(archive.into(), entries);
    }

    pub fn get(&self, archive: &Path) -> Option<Vec<ArchiveEntry>> {
        self.archives.lock().unwrap().get(archive).cloned()
    }
}

impl Default for TransientArchiveIo {
    fn default() -> TransientArchiveIo {
        TransientArchiveIo::new()
    }
}

#[async_trait]
impl ArchiveIo for TransientArchiveIo {
    async fn read_entries(&self, archive: &Path) -> anyhow::Result<Vec<ArchiveEntry>> {
        self.get(archive)
            .ok_or_else(|| anyhow!("no archive at {}", archive.display()))
    }

    async fn write(&self, target: &Path, entries: &[ArchiveEntry]) -> anyhow::Result<()> {
        self.archives.lock().unwrap().insert(target.to_path_buf(), entries.to_vec());
        Ok(())
    }

    async fn persist(&self, temp: &Path, target: &Path) -> anyhow::Result<()> {
        let mut archives = self.archives.lock().unwrap();
        let entries = archives
            .remove(temp)
            .ok_or_else(|| anyhow!("no archive at {}", temp.display()))?;
        archives.insert(target.to_path_buf(), entries);
        Ok(())
    }
}
