use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, remove_file, rename, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::checksum::{Digests, ALGORITHMS};
use crate::maven::metadata::SnapshotMetadata;
use crate::util::dir_lock::DirLock;

/// What the local cache remembers about a repository's snapshot metadata:
/// the parsed document plus when it was last fetched, so that staleness can
/// be judged without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub last_checked: u64,
    pub metadata: SnapshotMetadata,
}

impl MetadataRecord {
    pub fn now(metadata: SnapshotMetadata) -> MetadataRecord {
        MetadataRecord {
            last_checked: epoch_seconds(SystemTime::now()),
            metadata,
        }
    }

    pub fn is_stale(&self, update_delay: Duration) -> bool {
        epoch_seconds(SystemTime::now()).saturating_sub(self.last_checked) >= update_delay.as_secs()
    }
}

fn epoch_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The local artifact cache, a Maven-layout directory tree per remote
/// repository under one root. Writes go through a sibling temp file and a
/// rename so that concurrent readers never see partial artifacts.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> ArtifactStore {
        ArtifactStore { root: root.into() }
    }

    /// The absolute path an artifact of `repository` is cached at.
    pub fn stored_path(&self, repository: &str, path: &str) -> PathBuf {
        let mut result = self.root.join(repository);
        for part in path.split('/') {
            result.push(part);
        }
        result
    }

    pub async fn load(&self, repository: &str, path: &str) -> Option<Bytes> {
        let file = self.stored_path(repository, path);
        match tokio::fs::read(&file).await {
            Ok(data) => {
                trace!("cache hit for {}", file.display());
                Some(Bytes::from(data))
            }
            Err(_) => None,
        }
    }

    /// Last modification time of a cached artifact, the freshness criterion
    /// for mutable snapshot files.
    pub async fn modified(&self, repository: &str, path: &str) -> Option<SystemTime> {
        let file = self.stored_path(repository, path);
        tokio::fs::metadata(&file).await.ok()?.modified().ok()
    }

    /// Stores an artifact with its checksum sidecars. The sidecars are
    /// written first so a reader never finds an artifact it cannot verify.
    pub async fn store(
        &self,
        repository: &str,
        path: &str,
        data: &Bytes,
        digests: &Digests,
    ) -> anyhow::Result<PathBuf> {
        let target = self.stored_path(repository, path);
        let directory = match target.parent() {
            Some(directory) => directory.to_path_buf(),
            None => return Err(anyhow::anyhow!("artifact path {} has no parent", path)),
        };
        let _lock = DirLock::acquire(&directory).await?;

        for algorithm in ALGORITHMS {
            let mut sidecar = target.clone();
            sidecar.set_file_name(format!(
                "{}.{}",
                target.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                algorithm.suffix()
            ));
            write_via_temp(&sidecar, digests.sidecar(algorithm).as_bytes()).await?;
        }

        write_via_temp(&target, data).await?;
        trace!("stored {}", target.display());
        Ok(target)
    }

    pub async fn load_record(&self, repository: &str, path: &str) -> Option<MetadataRecord> {
        let data = self.load(repository, path).await?;
        match serde_json::from_slice(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("discarding unreadable metadata record {}: {}", path, e);
                None
            }
        }
    }

    pub async fn store_record(
        &self,
        repository: &str,
        path: &str,
        record: &MetadataRecord,
    ) -> anyhow::Result<()> {
        let target = self.stored_path(repository, path);
        let directory = match target.parent() {
            Some(directory) => directory.to_path_buf(),
            None => return Err(anyhow::anyhow!("record path {} has no parent", path)),
        };
        let _lock = DirLock::acquire(&directory).await?;

        write_via_temp(&target, &serde_json::to_vec(record)?).await
    }
}

async fn write_via_temp(target: &Path, data: &[u8]) -> anyhow::Result<()> {
    let directory = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent", target.display()))?;
    create_dir_all(directory).await?;

    let temp = directory.join(format!(
        "{}.{}.writing",
        target.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
        Uuid::new_v4().as_hyphenated()
    ));

    let result = async {
        let mut file = OpenOptions::new().create_new(true).write(true).open(&temp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        rename(&temp, target).await?;
        anyhow::Ok(())
    }
    .await;

    if result.is_err() {
        if let Err(e) = remove_file(&temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("error cleaning up {} after failed write: {}", temp.display(), e);
            }
        }
    }
    result
}
