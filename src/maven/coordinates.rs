use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXTENSION: &str = "jar";

/// Identifies one artifact in a Maven-layout repository.
///
/// Identity is purely structural - two coordinates are equal iff all five
/// components are equal, independent of any file system state. The derived
/// `Ord` gives a total, deterministic order used for stable output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub group: String,
    pub name: String,
    pub version: String,
    pub classifier: Option<String>,
    pub extension: String,
}

impl Coordinate {
    pub fn new(group: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Coordinate {
        Coordinate {
            group: group.into(),
            name: name.into(),
            version: version.into(),
            classifier: None,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Coordinate {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Coordinate {
        self.extension = extension.into();
        self
    }

    /// Snapshot versions end with the `-SNAPSHOT` suffix.
    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with("-SNAPSHOT")
    }

    /// The coordinate of this artifact's package manifest (its pom).
    pub fn as_pom(&self) -> Coordinate {
        Coordinate {
            group: self.group.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            classifier: None,
            extension: "pom".to_string(),
        }
    }

    /// Key under which competing versions of the same artifact conflict.
    pub fn conflict_key(&self) -> (String, String) {
        (self.group.clone(), self.name.clone())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        Ok(())
    }
}

impl FromStr for Coordinate {
    type Err = anyhow::Error;

    /// Parses the stable textual form `group:name:version[:classifier]`.
    fn from_str(s: &str) -> anyhow::Result<Coordinate> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [group, name, version] if !group.is_empty() && !name.is_empty() && !version.is_empty() => {
                Ok(Coordinate::new(*group, *name, *version))
            }
            [group, name, version, classifier]
                if !group.is_empty() && !name.is_empty() && !version.is_empty() && !classifier.is_empty() =>
            {
                Ok(Coordinate::new(*group, *name, *version).with_classifier(*classifier))
            }
            _ => Err(anyhow!("not a valid coordinate: {:?}", s)),
        }
    }
}

/// Maven dependency scope, restricted to the four values the resolver
/// understands. Anything else in a manifest is dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Compile,
    Runtime,
    Provided,
    Test,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Compile, Scope::Runtime, Scope::Provided, Scope::Test];

    /// Effective scope of a transitive dependency declared with scope `self`,
    /// reached through a parent edge of scope `parent`.
    ///
    /// Only `compile` and `runtime` edges propagate; the result is the weaker
    /// of the two scopes (`runtime` is weaker than `compile`). Dependencies
    /// declared `provided` or `test`, and anything reached through a
    /// `provided` or `test` edge, are not transitive at all.
    pub fn transitive_with(self, parent: Scope) -> Option<Scope> {
        match (parent, self) {
            (Scope::Compile, Scope::Compile) => Some(Scope::Compile),
            (Scope::Compile, Scope::Runtime)
            | (Scope::Runtime, Scope::Compile)
            | (Scope::Runtime, Scope::Runtime) => Some(Scope::Runtime),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Compile => "compile",
            Scope::Runtime => "runtime",
            Scope::Provided => "provided",
            Scope::Test => "test",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Scope> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compile" => Ok(Scope::Compile),
            "runtime" => Ok(Scope::Runtime),
            "provided" => Ok(Scope::Provided),
            "test" => Ok(Scope::Test),
            other => Err(anyhow!("unknown dependency scope: {:?}", other)),
        }
    }
}

/// Exclusion rule for transitive dependencies. `None` matches anything
/// (the `*` wildcard in manifest exclusions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub group: Option<String>,
    pub name: Option<String>,
}

impl Exclusion {
    pub fn of(group: impl Into<String>, name: impl Into<String>) -> Exclusion {
        Exclusion {
            group: Some(group.into()),
            name: Some(name.into()),
        }
    }

    pub fn excludes(&self, coordinate: &Coordinate) -> bool {
        self.group.as_deref().map_or(true, |g| g == coordinate.group)
            && self.name.as_deref().map_or(true, |n| n == coordinate.name)
    }
}

/// A dependency edge as declared by the caller: a coordinate, the scope it is
/// requested in, and the exclusion rules to apply along the paths it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub coordinate: Coordinate,
    pub scope: Scope,
    pub exclusions: Vec<Exclusion>,
}

impl Dependency {
    pub fn new(coordinate: Coordinate) -> Dependency {
        Dependency {
            coordinate,
            scope: Scope::Compile,
            exclusions: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Dependency {
        self.scope = scope;
        self
    }

    pub fn with_exclusion(mut self, exclusion: Exclusion) -> Dependency {
        self.exclusions.push(exclusion);
        self
    }
}

/// Maven-ish version precedence: segments split on `.` and `-`, numeric
/// segments compared numerically, and a bare version outranks one with a
/// trailing qualifier ("1.0" > "1.0-alpha"). Used by the `HighestWins`
/// conflict policy only; not a full implementation of Maven's ordering rules.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split(['.', '-']).collect();
    let right: Vec<&str> = b.split(['.', '-']).collect();

    for i in 0..left.len().max(right.len()) {
        let x = left.get(i).copied().unwrap_or("");
        let y = right.get(i).copied().unwrap_or("");
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => match (x.is_empty(), y.is_empty()) {
                // a missing segment outranks a qualifier but loses to a number
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => x.cmp(y),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
