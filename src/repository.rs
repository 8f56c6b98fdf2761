use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod client;
pub mod http;
pub mod store;

/// Metadata about mutable snapshot artifacts is refreshed at most once a day
/// unless a repository asks for something else.
pub const DAILY: Duration = Duration::from_secs(24 * 60 * 60);

/// A Maven-layout repository, remote or on the local file system.
///
/// A remote repository may carry a local cache repository; artifacts found
/// remotely are stored there, and later lookups prefer the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub uri: String,
    #[serde(default = "default_true")]
    pub releases: bool,
    #[serde(default)]
    pub snapshots: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<Box<Repository>>,
    #[serde(default = "default_snapshot_delay", with = "duration_secs")]
    pub snapshot_update_delay: Duration,
}

fn default_true() -> bool {
    true
}
fn default_snapshot_delay() -> Duration {
    DAILY
}

impl Repository {
    pub fn remote(name: impl Into<String>, uri: impl Into<String>, cache: Option<Repository>) -> Repository {
        Repository {
            name: name.into(),
            uri: uri.into(),
            releases: true,
            snapshots: false,
            cache: cache.map(Box::new),
            snapshot_update_delay: DAILY,
        }
    }

    pub fn local(name: impl Into<String>, uri: impl Into<String>) -> Repository {
        Repository {
            name: name.into(),
            uri: uri.into(),
            releases: true,
            snapshots: true,
            cache: None,
            snapshot_update_delay: DAILY,
        }
    }

    pub fn with_snapshots(mut self) -> Repository {
        self.snapshots = true;
        self
    }

    pub fn with_snapshot_update_delay(mut self, delay: Duration) -> Repository {
        self.snapshot_update_delay = delay;
        self
    }

    /// Local repositories are read from the file system directly and are
    /// never cached in turn.
    pub fn is_local(&self) -> bool {
        self.uri.starts_with("file:") || !self.uri.contains("://")
    }

    /// The directory a local repository is rooted at.
    pub fn local_root(&self) -> &str {
        self.uri.strip_prefix("file://").or_else(|| self.uri.strip_prefix("file:")).unwrap_or(&self.uri)
    }

    pub fn allows(&self, snapshot: bool) -> bool {
        if snapshot {
            self.snapshots
        } else {
            self.releases
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.uri.trim_end_matches('/'), path)
    }
}

/// The ordered list of repositories a resolution run queries. The order is
/// authoritative, a coordinate found at an earlier repository is never looked
/// up at a later one.
#[derive(Debug, Clone)]
pub struct RepositoryChain {
    repositories: Vec<Repository>,
}

impl RepositoryChain {
    /// Builds the effective chain from the declared repositories: caches are
    /// inlined in front of the repository they cache, local repositories move
    /// to the front, duplicates (by name) are dropped.
    pub fn new(declared: Vec<Repository>) -> RepositoryChain {
        let mut locals = Vec::new();
        let mut remotes = Vec::new();
        for repository in declared {
            if let Some(cache) = &repository.cache {
                locals.push((**cache).clone());
            }
            if repository.is_local() {
                locals.push(repository);
            } else {
                remotes.push(repository);
            }
        }

        let mut repositories: Vec<Repository> = Vec::new();
        for repository in locals.into_iter().chain(remotes) {
            if repositories.iter().any(|r| r.name == repository.name) {
                debug!("dropping duplicate repository {}", repository.name);
                continue;
            }
            repositories.push(repository);
        }
        RepositoryChain { repositories }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
