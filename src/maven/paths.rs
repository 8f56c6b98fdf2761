use crate::maven::coordinates::Coordinate;
use crate::maven::metadata::SnapshotVersion;

const SNAPSHOT_SUFFIX: &str = "SNAPSHOT";

/// Relative path of an artifact inside a Maven-layout repository:
/// `group/as/dirs/name/version/name-version[-classifier].extension`.
///
/// For unique snapshots the resolved `snapshot` version replaces the
/// `SNAPSHOT` part of the file name (the directory keeps the unqualified
/// version). With `snapshot = None` the unqualified, mutable path is built.
pub fn artifact_path(coordinate: &Coordinate, snapshot: Option<&SnapshotVersion>) -> String {
    format!(
        "{}/{}/{}/{}",
        coordinate.group.replace('.', "/"),
        coordinate.name,
        coordinate.version,
        file_name(coordinate, snapshot),
    )
}

/// Relative path of the package manifest (pom) belonging to `coordinate`.
pub fn pom_path(coordinate: &Coordinate, snapshot: Option<&SnapshotVersion>) -> String {
    artifact_path(&coordinate.as_pom(), snapshot)
}

/// Relative path of the snapshot metadata document for `coordinate`.
///
/// With a repository name the repository-suffixed form is produced, which is
/// the name used in the local cache so that metadata cached from one
/// repository never answers for another.
pub fn metadata_path(coordinate: &Coordinate, repository: Option<&str>) -> String {
    let mut path = format!(
        "{}/{}/{}/maven-metadata",
        coordinate.group.replace('.', "/"),
        coordinate.name,
        coordinate.version,
    );
    if let Some(repository) = repository {
        path.push('-');
        path.push_str(repository);
    }
    path.push_str(".xml");
    path
}

fn file_name(coordinate: &Coordinate, snapshot: Option<&SnapshotVersion>) -> String {
    let mut name = String::new();
    name.push_str(&coordinate.name);
    name.push('-');

    match snapshot {
        Some(snapshot) if coordinate.version.ends_with(SNAPSHOT_SUFFIX) => {
            name.push_str(&coordinate.version[..coordinate.version.len() - SNAPSHOT_SUFFIX.len()]);
            name.push_str(&snapshot.qualifier());
        }
        _ => name.push_str(&coordinate.version),
    }

    if let Some(classifier) = &coordinate.classifier {
        name.push('-');
        name.push_str(classifier);
    }
    name.push('.');
    name.push_str(&coordinate.extension);
    name
}
