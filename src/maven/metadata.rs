use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Timestamp and build number of the newest unique-snapshot build, as
/// published in a repository's `maven-metadata.xml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersion {
    pub timestamp: String,
    pub build_number: u32,
}

impl SnapshotVersion {
    /// The `timestamp-buildNumber` qualifier that replaces `SNAPSHOT` in
    /// resolved unique-snapshot file names.
    pub fn qualifier(&self) -> String {
        format!("{}-{}", self.timestamp, self.build_number)
    }
}

/// What a repository knows about a snapshot version of a coordinate.
///
/// `NonUnique` marks the old style single mutable artifact (`localCopy`, or
/// no `<snapshot>` element at all); there is no timestamp to resolve and the
/// unqualified path is fetched instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotMetadata {
    Unique(SnapshotVersion),
    NonUnique,
}

// Field names follow the maven-metadata.xml schema, see
// https://maven.apache.org/ref/3.9.5/maven-repository-metadata/repository-metadata.html
#[allow(non_snake_case)]
mod xml {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct Metadata {
        #[serde(default)]
        pub versioning: Option<Versioning>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Versioning {
        #[serde(default)]
        pub snapshot: Option<Snapshot>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Snapshot {
        #[serde(default)]
        pub timestamp: Option<String>,
        #[serde(default)]
        pub buildNumber: Option<u32>,
        #[serde(default)]
        pub localCopy: Option<bool>,
    }
}

/// Parses a `maven-metadata.xml` document. Callers treat an `Err` as
/// "not found at this repository", never as a fatal condition.
pub fn parse_snapshot_metadata(document: &str) -> anyhow::Result<SnapshotMetadata> {
    let metadata: xml::Metadata =
        serde_xml_rs::from_str(document).map_err(|e| anyhow!("malformed metadata xml: {}", e))?;

    let snapshot = match metadata.versioning.and_then(|v| v.snapshot) {
        Some(snapshot) => snapshot,
        None => return Ok(SnapshotMetadata::NonUnique),
    };

    if snapshot.localCopy.unwrap_or(false) {
        return Ok(SnapshotMetadata::NonUnique);
    }

    match snapshot.timestamp {
        Some(timestamp) => Ok(SnapshotMetadata::Unique(SnapshotVersion {
            timestamp,
            build_number: snapshot.buildNumber.unwrap_or(0),
        })),
        None => {
            warn!("snapshot metadata has no timestamp, treating as non-unique");
            Ok(SnapshotMetadata::NonUnique)
        }
    }
}
