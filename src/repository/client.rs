use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::checksum::{self, Digests, ALGORITHMS};
use crate::maven::coordinates::Coordinate;
use crate::maven::metadata::{parse_snapshot_metadata, SnapshotMetadata, SnapshotVersion};
use crate::maven::paths::{artifact_path, metadata_path};
use crate::repository::http::Downloader;
use crate::repository::store::{ArtifactStore, MetadataRecord};
use crate::repository::Repository;

/// Offline resolution answers from the local cache only and never touches
/// the network, stale or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMode {
    Online,
    Offline,
}

/// An artifact as obtained from one repository: its bytes, the file it ended
/// up at on the local disk, and which repository answered.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub data: Bytes,
    pub repository: String,
    pub sha256: [u8; 32],
}

/// Fetches artifacts and snapshot metadata from a single repository at a
/// time, going through the local cache for remote repositories.
///
/// Every way a repository can fail to produce an artifact (transport error,
/// absent file, unparseable metadata, checksum mismatch) is treated as "not
/// found at this repository" so the caller can move on along the chain.
pub struct RepositoryClient {
    downloader: Arc<dyn Downloader>,
    store: Arc<ArtifactStore>,
    mode: ResolutionMode,
}

impl RepositoryClient {
    pub fn new(downloader: Arc<dyn Downloader>, store: Arc<ArtifactStore>, mode: ResolutionMode) -> RepositoryClient {
        RepositoryClient { downloader, store, mode }
    }

    /// What `repository` currently publishes for a snapshot version. Absent
    /// metadata means the old style single mutable artifact and is not an
    /// error; unparseable metadata disqualifies the repository.
    pub async fn fetch_snapshot_metadata(
        &self,
        coordinate: &Coordinate,
        repository: &Repository,
    ) -> Option<SnapshotMetadata> {
        if !repository.allows(true) {
            return None;
        }

        if repository.is_local() {
            let path = PathBuf::from(repository.local_root()).join(metadata_path(coordinate, None));
            return match tokio::fs::read_to_string(&path).await {
                Ok(document) => match parse_snapshot_metadata(&document) {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        warn!("unparseable snapshot metadata at {}: {}", path.display(), e);
                        None
                    }
                },
                Err(_) => Some(SnapshotMetadata::NonUnique),
            };
        }

        let record_path = record_path(coordinate, &repository.name);
        let record = self.store.load_record(&repository.name, &record_path).await;

        if let Some(record) = &record {
            if !record.is_stale(repository.snapshot_update_delay) {
                trace!("using cached snapshot metadata for {} from {}", coordinate, repository.name);
                return Some(record.metadata.clone());
            }
        }
        if self.mode == ResolutionMode::Offline {
            return record.map(|r| r.metadata);
        }

        let url = repository.url_for(&metadata_path(coordinate, None));
        match self.downloader.fetch(&url).await {
            Some(downloaded) => {
                let document = String::from_utf8_lossy(&downloaded.data);
                match parse_snapshot_metadata(&document) {
                    Ok(metadata) => {
                        let record = MetadataRecord::now(metadata.clone());
                        if let Err(e) = self.store.store_record(&repository.name, &record_path, &record).await {
                            warn!("failed to cache snapshot metadata for {}: {}", coordinate, e);
                        }
                        Some(metadata)
                    }
                    Err(e) => {
                        warn!("unparseable snapshot metadata at {}: {}", url, e);
                        None
                    }
                }
            }
            None => match record {
                Some(record) => {
                    warn!(
                        "could not refresh snapshot metadata for {} from {}, using stale cache",
                        coordinate, repository.name
                    );
                    Some(record.metadata)
                }
                None => Some(SnapshotMetadata::NonUnique),
            },
        }
    }

    /// Fetches one artifact from one repository. For unique snapshots the
    /// resolved `snapshot` version selects the timestamped file; a mutable
    /// artifact (non-unique snapshot) is refetched once its cached copy is
    /// older than the repository's update delay.
    pub async fn fetch_artifact(
        &self,
        coordinate: &Coordinate,
        repository: &Repository,
        snapshot: Option<&SnapshotVersion>,
    ) -> Option<FetchedArtifact> {
        if !repository.allows(coordinate.is_snapshot()) {
            return None;
        }
        let path = artifact_path(coordinate, snapshot);

        if repository.is_local() {
            let file = PathBuf::from(repository.local_root()).join(&path);
            return match tokio::fs::read(&file).await {
                Ok(data) => {
                    let data = Bytes::from(data);
                    Some(FetchedArtifact {
                        sha256: Digests::of(&data).sha256,
                        path: file,
                        data,
                        repository: repository.name.clone(),
                    })
                }
                Err(_) => None,
            };
        }

        let mutable = coordinate.is_snapshot() && snapshot.is_none();
        let cached = self.store.load(&repository.name, &path).await;

        if let Some(data) = &cached {
            let fresh = !mutable || self.cached_is_fresh(repository, &path).await;
            if fresh || self.mode == ResolutionMode::Offline {
                return Some(FetchedArtifact {
                    sha256: Digests::of(data).sha256,
                    path: self.store.stored_path(&repository.name, &path),
                    data: data.clone(),
                    repository: repository.name.clone(),
                });
            }
        }
        if self.mode == ResolutionMode::Offline {
            return None;
        }

        match self.download_verified(repository, &path).await {
            Some((data, digests)) => {
                let stored = match self.store.store(&repository.name, &path, &data, &digests).await {
                    Ok(stored) => stored,
                    Err(e) => {
                        warn!("failed to cache {} from {}: {}", path, repository.name, e);
                        self.store.stored_path(&repository.name, &path)
                    }
                };
                Some(FetchedArtifact {
                    path: stored,
                    sha256: digests.sha256,
                    data,
                    repository: repository.name.clone(),
                })
            }
            None => cached.map(|data| {
                warn!("could not refresh {} from {}, using stale cache", path, repository.name);
                FetchedArtifact {
                    sha256: Digests::of(&data).sha256,
                    path: self.store.stored_path(&repository.name, &path),
                    data,
                    repository: repository.name.clone(),
                }
            }),
        }
    }

    async fn cached_is_fresh(&self, repository: &Repository, path: &str) -> bool {
        match self.store.modified(&repository.name, path).await {
            Some(modified) => match SystemTime::now().duration_since(modified) {
                Ok(age) => age < repository.snapshot_update_delay,
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Downloads an artifact and checks it against the first checksum sidecar
    /// the repository publishes. A mismatch disqualifies the artifact; a
    /// repository without any sidecar is accepted as is.
    async fn download_verified(&self, repository: &Repository, path: &str) -> Option<(Bytes, Digests)> {
        let downloaded = self.downloader.fetch(&repository.url_for(path)).await?;

        for algorithm in ALGORITHMS {
            let sidecar_url = format!("{}.{}", repository.url_for(path), algorithm.suffix());
            if let Some(sidecar) = self.downloader.fetch(&sidecar_url).await {
                let document = String::from_utf8_lossy(&sidecar.data);
                if checksum::verify(&downloaded.data, algorithm, &document) {
                    return Some((downloaded.data, downloaded.digests));
                }
                warn!("{} checksum mismatch for {} at {}", algorithm.suffix(), path, repository.name);
                return None;
            }
        }
        debug!("no checksum sidecar for {} at {}", path, repository.name);
        Some((downloaded.data, downloaded.digests))
    }
}

/// Cache file for a repository's snapshot metadata. The repository name is
/// part of the file name so metadata cached from one repository never
/// answers for another.
fn record_path(coordinate: &Coordinate, repository: &str) -> String {
    let xml = metadata_path(coordinate, Some(repository));
    format!("{}.json", xml.trim_end_matches(".xml"))
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::repository::http::TransientDownloader;

    use super::*;

    fn remote() -> Repository {
        Repository::remote("central", "https://repo.example.org/maven2", None).with_snapshots()
    }

    fn client(downloader: Arc<TransientDownloader>, root: &std::path::Path, mode: ResolutionMode) -> RepositoryClient {
        RepositoryClient::new(downloader, Arc::new(ArtifactStore::new(root)), mode)
    }

    fn publish_with_sidecar(downloader: &TransientDownloader, url: &str, data: &'static [u8]) {
        downloader.publish(url, data);
        downloader.publish(format!("{}.sha1", url), hex::encode(Digests::of(data).sha1));
    }

    #[tokio::test]
    async fn test_fetch_from_remote_and_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(TransientDownloader::new());
        publish_with_sidecar(
            &downloader,
            "https://repo.example.org/maven2/org/example/demo/1.0/demo-1.0.jar",
            b"demo bytes",
        );

        let client = client(downloader.clone(), dir.path(), ResolutionMode::Online);
        let coordinate = Coordinate::new("org.example", "demo", "1.0");

        let fetched = client.fetch_artifact(&coordinate, &remote(), None).await.unwrap();
        assert_eq!(&fetched.data[..], b"demo bytes");
        assert_eq!(fetched.repository, "central");
        assert!(fetched.path.exists());

        // served from the cache once the remote is gone
        downloader.remove("https://repo.example.org/maven2/org/example/demo/1.0/demo-1.0.jar");
        let again = client.fetch_artifact(&coordinate, &remote(), None).await.unwrap();
        assert_eq!(again.data, fetched.data);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_disqualifies() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(TransientDownloader::new());
        downloader.publish(
            "https://repo.example.org/maven2/org/example/demo/1.0/demo-1.0.jar",
            &b"demo bytes"[..],
        );
        downloader.publish(
            "https://repo.example.org/maven2/org/example/demo/1.0/demo-1.0.jar.sha1",
            hex::encode([0u8; 20]),
        );

        let client = client(downloader, dir.path(), ResolutionMode::Online);
        let coordinate = Coordinate::new("org.example", "demo", "1.0");
        assert!(client.fetch_artifact(&coordinate, &remote(), None).await.is_none());
    }

    #[tokio::test]
    async fn test_offline_uses_cache_only() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(TransientDownloader::new());
        publish_with_sidecar(
            &downloader,
            "https://repo.example.org/maven2/org/example/demo/1.0/demo-1.0.jar",
            b"demo bytes",
        );
        let coordinate = Coordinate::new("org.example", "demo", "1.0");

        let online = client(downloader.clone(), dir.path(), ResolutionMode::Online);
        online.fetch_artifact(&coordinate, &remote(), None).await.unwrap();

        let offline = client(downloader, dir.path(), ResolutionMode::Offline);
        assert!(offline.fetch_artifact(&coordinate, &remote(), None).await.is_some());

        let other = Coordinate::new("org.example", "other", "1.0");
        assert!(offline.fetch_artifact(&other, &remote(), None).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_metadata_cached_until_stale() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(TransientDownloader::new());
        downloader.publish(
            "https://repo.example.org/maven2/org/example/demo/1.0-SNAPSHOT/maven-metadata.xml",
            &br#"<metadata>
                  <versioning><snapshot>
                    <timestamp>20240131.123456</timestamp>
                    <buildNumber>3</buildNumber>
                  </snapshot></versioning>
                </metadata>"#[..],
        );
        let coordinate = Coordinate::new("org.example", "demo", "1.0-SNAPSHOT");

        let client = client(downloader.clone(), dir.path(), ResolutionMode::Online);
        let metadata = client.fetch_snapshot_metadata(&coordinate, &remote()).await.unwrap();
        let expected = SnapshotMetadata::Unique(SnapshotVersion {
            timestamp: "20240131.123456".to_string(),
            build_number: 3,
        });
        assert_eq!(metadata, expected);

        // within the update delay the cached record answers, remote changes stay invisible
        downloader.publish(
            "https://repo.example.org/maven2/org/example/demo/1.0-SNAPSHOT/maven-metadata.xml",
            &br#"<metadata>
                  <versioning><snapshot>
                    <timestamp>20240201.000000</timestamp>
                    <buildNumber>4</buildNumber>
                  </snapshot></versioning>
                </metadata>"#[..],
        );
        let cached = client.fetch_snapshot_metadata(&coordinate, &remote()).await.unwrap();
        assert_eq!(cached, expected);

        // a zero delay always refetches and sees the change
        let impatient = remote().with_snapshot_update_delay(Duration::ZERO);
        let refreshed = client.fetch_snapshot_metadata(&coordinate, &impatient).await.unwrap();
        let changed = SnapshotMetadata::Unique(SnapshotVersion {
            timestamp: "20240201.000000".to_string(),
            build_number: 4,
        });
        assert_eq!(refreshed, changed);

        // when the refetch fails the stale record answers
        downloader.remove("https://repo.example.org/maven2/org/example/demo/1.0-SNAPSHOT/maven-metadata.xml");
        let stale = client.fetch_snapshot_metadata(&coordinate, &impatient).await.unwrap();
        assert_eq!(stale, changed);
    }

    #[tokio::test]
    async fn test_missing_snapshot_metadata_means_non_unique() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(Arc::new(TransientDownloader::new()), dir.path(), ResolutionMode::Online);

        let coordinate = Coordinate::new("org.example", "demo", "1.0-SNAPSHOT");
        assert_eq!(
            client.fetch_snapshot_metadata(&coordinate, &remote()).await,
            Some(SnapshotMetadata::NonUnique)
        );
    }

    #[tokio::test]
    async fn test_repository_policy_gates_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(Arc::new(TransientDownloader::new()), dir.path(), ResolutionMode::Online);

        let releases_only = Repository::remote("central", "https://repo.example.org/maven2", None);
        let snapshot = Coordinate::new("org.example", "demo", "1.0-SNAPSHOT");
        assert!(client.fetch_artifact(&snapshot, &releases_only, None).await.is_none());
        assert!(client.fetch_snapshot_metadata(&snapshot, &releases_only).await.is_none());
    }
}
