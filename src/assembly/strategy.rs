use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What to do with all contributors to one output path.
///
/// Every group goes through its strategy, including groups with a single
/// contributor, so a `Discard` or `Rename` rule applies even when there is
/// no collision at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Keep the first contributor in insertion order.
    First,
    /// Keep the last contributor in insertion order.
    Last,
    /// Require exactly one contributor tagged as own build output.
    SingleOwn,
    /// Require exactly one contributor of any kind.
    SingleOrError,
    /// Byte-concatenate all contributors in insertion order.
    Concatenate,
    /// Concatenate all contributors' text lines, one trailing newline.
    Lines,
    /// As [MergeStrategy::Lines], dropping duplicate lines, first occurrence wins.
    UniqueLines,
    /// Drop the path entirely.
    Discard,
    /// Require all contributors to be byte-identical and keep one copy.
    Deduplicate,
    /// Keep the own contributor at the path, move every foreign one to a
    /// path produced by the rename function.
    Rename,
}

/// One rule of a strategy table, matched against normalized entry paths.
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// The whole path, case insensitive.
    Exact(String),
    /// A path prefix, case insensitive. Typically a directory like `META-INF/`.
    Prefix(String),
    /// A regular expression over the file name (the last path segment).
    FileName(Regex),
}

impl PathPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path.eq_ignore_ascii_case(exact),
            PathPattern::Prefix(prefix) => path
                .get(..prefix.len())
                .map_or(false, |p| p.eq_ignore_ascii_case(prefix)),
            PathPattern::FileName(regex) => {
                let name = path.rsplit('/').next().unwrap_or(path);
                regex.is_match(name)
            }
        }
    }
}

/// Ordered rules choosing the [MergeStrategy] for each output path; the
/// first matching rule wins, unmatched paths get the default.
pub struct StrategyTable {
    rules: Vec<(PathPattern, MergeStrategy)>,
    default: MergeStrategy,
}

impl StrategyTable {
    pub fn new(default: MergeStrategy) -> StrategyTable {
        StrategyTable {
            rules: Vec::new(),
            default,
        }
    }

    pub fn with_rule(mut self, pattern: PathPattern, strategy: MergeStrategy) -> StrategyTable {
        self.rules.push((pattern, strategy));
        self
    }

    pub fn strategy_for(&self, path: &str) -> MergeStrategy {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, strategy)| *strategy)
            .unwrap_or(self.default)
    }

    /// The conventional table for merging jar files: informational files are
    /// kept under renamed paths, per-service registrations are merged line
    /// wise, the rest of `META-INF` must come from the own build, and
    /// everything else must not conflict.
    pub fn for_jars() -> StrategyTable {
        StrategyTable::new(MergeStrategy::Deduplicate)
            .with_rule(PathPattern::FileName(README.clone()), MergeStrategy::Rename)
            .with_rule(PathPattern::FileName(LICENSE.clone()), MergeStrategy::Rename)
            .with_rule(PathPattern::FileName(SYSTEM_JUNK.clone()), MergeStrategy::Discard)
            .with_rule(
                PathPattern::Exact("META-INF/MANIFEST.MF".to_string()),
                MergeStrategy::Rename,
            )
            .with_rule(
                PathPattern::Prefix("META-INF/services/".to_string()),
                MergeStrategy::UniqueLines,
            )
            .with_rule(
                PathPattern::Prefix("META-INF/".to_string()),
                MergeStrategy::SingleOwn,
            )
    }
}

lazy_static! {
    static ref README: Regex =
        Regex::new(r"(?i)^[^.]*(readme|about)[^.]*(\.(txt|md|markdown))?$").unwrap();
    static ref LICENSE: Regex =
        Regex::new(r"(?i)^[^.]*(license|licence|notice|copying)[^.]*(\.(txt|md|markdown))?$").unwrap();
    static ref SYSTEM_JUNK: Regex = Regex::new(r"(?i)^(\.DS_Store|Thumbs\.db)$").unwrap();
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::manifest("META-INF/MANIFEST.MF", MergeStrategy::Rename)]
    #[case::manifest_lower_case("meta-inf/manifest.mf", MergeStrategy::Rename)]
    #[case::service_registration("META-INF/services/java.sql.Driver", MergeStrategy::UniqueLines)]
    #[case::other_meta_inf("META-INF/notes/build.properties", MergeStrategy::SingleOwn)]
    #[case::readme("README.md", MergeStrategy::Rename)]
    #[case::nested_license("org/example/LICENSE.txt", MergeStrategy::Rename)]
    #[case::junk(".DS_Store", MergeStrategy::Discard)]
    #[case::class_file("org/example/App.class", MergeStrategy::Deduplicate)]
    fn test_jar_table(#[case] path: &str, #[case] expected: MergeStrategy) {
        assert_eq!(StrategyTable::for_jars().strategy_for(path), expected);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let table = StrategyTable::new(MergeStrategy::Deduplicate)
            .with_rule(
                PathPattern::Exact("conf/app.properties".to_string()),
                MergeStrategy::First,
            )
            .with_rule(PathPattern::Prefix("conf/".to_string()), MergeStrategy::Concatenate);

        assert_eq!(table.strategy_for("conf/app.properties"), MergeStrategy::First);
        assert_eq!(table.strategy_for("conf/logging.properties"), MergeStrategy::Concatenate);
        assert_eq!(table.strategy_for("other.txt"), MergeStrategy::Deduplicate);
    }
}
