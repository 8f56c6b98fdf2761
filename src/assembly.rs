use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::assembly::archive::{normalize_zip_path, ArchiveEntry, ArchiveIo};
use crate::assembly::strategy::{MergeStrategy, StrategyTable};
use crate::checksum::content_equals;

pub mod archive;
pub mod strategy;

/// One contributor to the output archive: bytes destined for one entry path,
/// tagged with where they came from and whether they are own build output.
#[derive(Debug, Clone)]
pub struct AssemblySource {
    pub path: String,
    pub origin: String,
    pub own: bool,
    pub data: Bytes,
}

/// Maps a foreign contributor at a path to the path it survives at under
/// [MergeStrategy::Rename], or `None` to drop it. Only called for foreign
/// contributors; an own one always keeps its path.
pub type RenameFn = Box<dyn FnMut(&AssemblySource, &str) -> Option<String> + Send>;

/// The default rename function: an increasing numeric suffix scoped per
/// original path, `a/b.txt` becoming `a/b_1.txt`, `a/b_2.txt` and so on.
/// Strictly monotonic, so renames never collide with each other.
pub fn suffix_rename() -> RenameFn {
    let mut counters: HashMap<String, usize> = HashMap::new();
    Box::new(move |_source, path| {
        let counter = counters.entry(path.to_string()).or_insert(0);
        *counter += 1;
        Some(match path.rfind('.') {
            Some(separator) if !path[separator..].contains('/') => {
                format!("{}_{}{}", &path[..separator], counter, &path[separator..])
            }
            _ => format!("{}_{}", path, counter),
        })
    })
}

#[derive(Debug)]
pub struct MergeConflict {
    pub path: String,
    pub reason: String,
    pub contributors: Vec<String>,
}

/// Every merge conflict of one assembly, collected before failing so the
/// caller sees all offending paths at once.
#[derive(Debug)]
pub struct ConflictReport {
    pub conflicts: Vec<MergeConflict>,
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assembly failed with {} merge conflict(s):", self.conflicts.len())?;
        for conflict in &self.conflicts {
            write!(f, "\n  {}: {}", conflict.path, conflict.reason)?;
            for contributor in &conflict.contributors {
                write!(f, "\n    - {}", contributor)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConflictReport {}

/// Collects contributors and merges them into one archive.
///
/// Contributors sharing a normalized entry path form a merge group; the
/// strategy table decides what each group contributes to the output,
/// singleton groups included. The output entry order is sorted by path so
/// the archive is reproducible.
pub struct AssemblyOperation {
    groups: BTreeMap<String, Vec<AssemblySource>>,
    table: StrategyTable,
    rename: RenameFn,
}

impl AssemblyOperation {
    pub fn new(table: StrategyTable) -> AssemblyOperation {
        AssemblyOperation {
            groups: BTreeMap::new(),
            table,
            rename: suffix_rename(),
        }
    }

    pub fn with_rename(mut self, rename: RenameFn) -> AssemblyOperation {
        self.rename = rename;
        self
    }

    pub fn add_file(&mut self, path: &str, data: impl Into<Bytes>, own: bool, origin: impl Into<String>) {
        let path = normalize_zip_path(path);
        self.groups.entry(path.clone()).or_default().push(AssemblySource {
            path,
            origin: origin.into(),
            own,
            data: data.into(),
        });
    }

    /// Adds every entry of an already-read archive, each at its own path.
    /// This is how dependency jars are flattened into the output.
    pub fn add_entries(&mut self, entries: Vec<ArchiveEntry>, own: bool, origin: &str) {
        for entry in entries {
            let origin = format!("{}?{}", origin, entry.path);
            self.add_file(&entry.path.clone(), entry.data, own, origin);
        }
    }

    /// Adds an archive file, either extracted entry by entry or verbatim as
    /// a single entry named after the file.
    pub async fn add_archive(
        &mut self,
        io: &dyn ArchiveIo,
        archive: &Path,
        own: bool,
        extract: bool,
    ) -> anyhow::Result<()> {
        let origin = archive.display().to_string();
        if extract {
            let entries = io.read_entries(archive).await?;
            self.add_entries(entries, own, &origin);
        } else {
            let name = archive
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("{} has no file name", archive.display()))?
                .to_string();
            let data = tokio::fs::read(archive).await?;
            self.add_file(&name, data, own, origin);
        }
        Ok(())
    }

    /// Applies the strategy table to every merge group and produces the
    /// final entry set, or all merge conflicts if there are any.
    pub fn resolve(mut self) -> Result<BTreeMap<String, Bytes>, ConflictReport> {
        let mut output: BTreeMap<String, Bytes> = BTreeMap::new();
        let mut conflicts: Vec<MergeConflict> = Vec::new();
        // renames happen last, once it is known which paths stay free
        let mut to_rename: Vec<(String, Vec<AssemblySource>)> = Vec::new();

        for (path, sources) in std::mem::take(&mut self.groups) {
            let strategy = self.table.strategy_for(&path);
            trace!("{} contributor(s) at {}, strategy {:?}", sources.len(), path, strategy);

            match strategy {
                MergeStrategy::First => {
                    output.insert(path, sources.into_iter().next().map(|s| s.data).unwrap_or_default());
                }
                MergeStrategy::Last => {
                    output.insert(path, sources.into_iter().last().map(|s| s.data).unwrap_or_default());
                }
                MergeStrategy::SingleOwn => {
                    let own: Vec<&AssemblySource> = sources.iter().filter(|s| s.own).collect();
                    match own.as_slice() {
                        [single] => {
                            output.insert(path, single.data.clone());
                        }
                        [] => conflicts.push(conflict(&path, "no own contributor", &sources)),
                        _ => conflicts.push(conflict(&path, "more than one own contributor", &sources)),
                    }
                }
                MergeStrategy::SingleOrError => {
                    if sources.len() == 1 {
                        let source = sources.into_iter().next();
                        output.insert(path, source.map(|s| s.data).unwrap_or_default());
                    } else {
                        conflicts.push(conflict(&path, "more than one contributor", &sources));
                    }
                }
                MergeStrategy::Concatenate => {
                    let mut data = Vec::new();
                    for source in &sources {
                        data.extend_from_slice(&source.data);
                    }
                    output.insert(path, Bytes::from(data));
                }
                MergeStrategy::Lines => {
                    output.insert(path, merge_lines(&sources, false));
                }
                MergeStrategy::UniqueLines => {
                    output.insert(path, merge_lines(&sources, true));
                }
                MergeStrategy::Discard => {
                    debug!("discarding {} contributor(s) at {}", sources.len(), path);
                }
                MergeStrategy::Deduplicate => {
                    if sources.iter().skip(1).any(|s| !content_equals(&s.data, &sources[0].data)) {
                        conflicts.push(conflict(&path, "contributors differ", &sources));
                    } else {
                        output.insert(path, sources.into_iter().next().map(|s| s.data).unwrap_or_default());
                    }
                }
                MergeStrategy::Rename => to_rename.push((path, sources)),
            }
        }

        for (path, sources) in to_rename {
            let mut own_kept = false;
            for source in sources {
                let renamed = if source.own {
                    if own_kept {
                        conflicts.push(MergeConflict {
                            path: path.clone(),
                            reason: "more than one own contributor".to_string(),
                            contributors: vec![source.origin.clone()],
                        });
                        continue;
                    }
                    own_kept = true;
                    Some(path.clone())
                } else {
                    (self.rename)(&source, &path).map(|p| normalize_zip_path(&p))
                };

                match renamed {
                    None => debug!("discarding {} at {}", source.origin, path),
                    Some(renamed) => {
                        if output.contains_key(&renamed) {
                            conflicts.push(MergeConflict {
                                path: path.clone(),
                                reason: format!("rename target {} is already occupied", renamed),
                                contributors: vec![source.origin.clone()],
                            });
                        } else {
                            debug!("moving {} from {} to {}", source.origin, path, renamed);
                            output.insert(renamed, source.data);
                        }
                    }
                }
            }
        }

        if conflicts.is_empty() {
            Ok(output)
        } else {
            Err(ConflictReport { conflicts })
        }
    }

    /// Resolves all merge groups and writes the archive. The archive is
    /// written to a temp sibling first and only moved to `target` once
    /// complete, so a failure never leaves partial output there.
    pub async fn assemble(self, io: &dyn ArchiveIo, target: &Path) -> anyhow::Result<()> {
        let entries: Vec<ArchiveEntry> = self
            .resolve()
            .map_err(anyhow::Error::new)?
            .into_iter()
            .map(|(path, data)| ArchiveEntry { path, data })
            .collect();

        let temp = target.with_file_name(format!(
            "{}.{}.writing",
            target.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
            Uuid::new_v4().as_hyphenated()
        ));

        io.write(&temp, &entries).await?;
        io.persist(&temp, target).await?;
        debug!("assembled {} entries into {}", entries.len(), target.display());
        Ok(())
    }
}

fn conflict(path: &str, reason: &str, sources: &[AssemblySource]) -> MergeConflict {
    MergeConflict {
        path: path.to_string(),
        reason: reason.to_string(),
        contributors: sources.iter().map(|s| s.origin.clone()).collect(),
    }
}

/// Joins all contributors' lines with one line ending, one trailing ending.
/// The ending is the first one found in any contributor, `\n` when none has
/// one; `unique` drops duplicate lines keeping first occurrence order.
fn merge_lines(sources: &[AssemblySource], unique: bool) -> Bytes {
    let mut lines: Vec<String> = Vec::new();
    let mut ending: Option<&str> = None;

    for source in sources {
        let text = String::from_utf8_lossy(&source.data).into_owned();
        if ending.is_none() {
            ending = detect_ending(&text);
        }
        for line in split_lines(&text) {
            if !unique || !lines.contains(&line) {
                lines.push(line);
            }
        }
    }

    let ending = ending.unwrap_or("\n");
    let mut result = String::new();
    for line in lines {
        result.push_str(&line);
        result.push_str(ending);
    }
    Bytes::from(result)
}

fn detect_ending(text: &str) -> Option<&'static str> {
    for ending in ["\r\n", "\n", "\r"] {
        if text.contains(ending) {
            return Some(ending);
        }
    }
    None
}

fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => lines.push(std::mem::take(&mut current)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
