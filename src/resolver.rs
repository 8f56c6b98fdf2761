use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_recursion::async_recursion;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, trace, warn};

use crate::maven::coordinates::{compare_versions, Coordinate, Dependency, Exclusion, Scope};
use crate::maven::metadata::{SnapshotMetadata, SnapshotVersion};
use crate::maven::pom::{parse_pom, Pom};
use crate::repository::client::RepositoryClient;
use crate::repository::RepositoryChain;

/// How competing versions of the same `group:name` are mediated.
///
/// `NearestWins` selects the version declared closest to the root, breaking
/// equal-distance ties in declaration order. `HighestWins` selects the
/// highest version seen anywhere in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    NearestWins,
    HighestWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub conflict_policy: ConflictPolicy,
    /// Upper bound on repository requests in flight at once.
    pub max_concurrent_fetches: usize,
    /// Resolve each snapshot version's timestamp at most once per run, so
    /// all artifacts of a coordinate come from the same build.
    pub pin_snapshots: bool,
}

impl Default for ResolverConfig {
    fn default() -> ResolverConfig {
        ResolverConfig {
            conflict_policy: ConflictPolicy::NearestWins,
            max_concurrent_fetches: 8,
            pin_snapshots: true,
        }
    }
}

/// One artifact of the resolved closure, on disk and in memory.
#[derive(Debug)]
pub struct ResolvedArtifact {
    pub coordinate: Coordinate,
    pub path: PathBuf,
    pub data: Bytes,
    pub repository: String,
    pub sha256: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct UnresolvedDependency {
    pub coordinate: Coordinate,
    pub reason: String,
}

/// The outcome of a resolution run: the transitive closure grouped by
/// effective scope, plus every coordinate that could not be resolved.
///
/// The same artifact is never held twice; re-reaching a coordinate yields
/// the same `Arc`.
#[derive(Debug, Default)]
pub struct ResolutionResult {
    artifacts: BTreeMap<Scope, Vec<Arc<ResolvedArtifact>>>,
    unresolved: Vec<UnresolvedDependency>,
}

impl ResolutionResult {
    pub fn artifacts(&self, scope: Scope) -> &[Arc<ResolvedArtifact>] {
        self.artifacts.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_artifacts(&self) -> impl Iterator<Item = &Arc<ResolvedArtifact>> {
        Scope::ALL.into_iter().flat_map(|scope| self.artifacts(scope).iter())
    }

    pub fn unresolved(&self) -> &[UnresolvedDependency] {
        &self.unresolved
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Fails with one aggregated error naming every unresolved coordinate.
    pub fn require_complete(&self) -> anyhow::Result<()> {
        if self.unresolved.is_empty() {
            return Ok(());
        }
        let mut message = String::from("failed to resolve:");
        for unresolved in &self.unresolved {
            message.push_str(&format!("\n  {} ({})", unresolved.coordinate, unresolved.reason));
        }
        Err(anyhow!(message))
    }

    /// Artifacts needed on the compilation classpath.
    pub fn compile_classpath(&self) -> Vec<Arc<ResolvedArtifact>> {
        self.classpath(&[Scope::Compile, Scope::Provided])
    }

    /// Artifacts needed at run time.
    pub fn runtime_classpath(&self) -> Vec<Arc<ResolvedArtifact>> {
        self.classpath(&[Scope::Compile, Scope::Runtime])
    }

    fn classpath(&self, scopes: &[Scope]) -> Vec<Arc<ResolvedArtifact>> {
        scopes
            .iter()
            .flat_map(|s| self.artifacts(*s).iter().cloned())
            .collect()
    }

    fn insert(&mut self, scope: Scope, artifact: Arc<ResolvedArtifact>) {
        self.artifacts.entry(scope).or_default().push(artifact);
    }
}

/// Result of fetching one coordinate, shared between every resolution path
/// that reaches it.
#[derive(Clone)]
enum FetchOutcome {
    Found {
        artifact: Arc<ResolvedArtifact>,
        dependencies: Arc<Vec<Dependency>>,
    },
    NotFound {
        reason: String,
    },
}

/// State of one resolution run. The single-flight map guarantees each
/// coordinate is fetched once no matter how many graph paths reach it, and
/// survives conflict-policy restarts.
struct RunState {
    in_flight: Mutex<HashMap<Coordinate, Arc<OnceCell<FetchOutcome>>>>,
    pinned_snapshots: Mutex<HashMap<(String, String, String), Option<SnapshotVersion>>>,
    fetch_permits: Semaphore,
}

/// A node of the breadth-first traversal: a coordinate together with its
/// effective scope and the exclusions accumulated along the path to it.
struct Node {
    coordinate: Coordinate,
    scope: Scope,
    exclusions: Vec<Exclusion>,
}

/// Computes transitive dependency closures over a repository chain.
pub struct DependencyResolver {
    client: Arc<RepositoryClient>,
    config: ResolverConfig,
}

impl DependencyResolver {
    pub fn new(client: Arc<RepositoryClient>, config: ResolverConfig) -> DependencyResolver {
        DependencyResolver { client, config }
    }

    /// Resolves the transitive closure of `dependencies` against `chain`.
    ///
    /// Traversal is breadth first, level by level, so that nearer
    /// declarations are mediated before farther ones and runs are
    /// reproducible. Unresolvable coordinates never abort the run, they are
    /// collected on the result.
    pub async fn resolve(&self, dependencies: &[Dependency], chain: &RepositoryChain) -> ResolutionResult {
        let state = RunState {
            in_flight: Mutex::new(HashMap::new()),
            pinned_snapshots: Mutex::new(HashMap::new()),
            fetch_permits: Semaphore::new(self.config.max_concurrent_fetches),
        };

        // Under HighestWins a version discovered deeper in the graph can
        // override a nearer one, which may change the subtree below the
        // overridden node. Each override restarts the traversal with the
        // winning versions forced; restarts are cheap because fetches are
        // shared across them.
        let mut forced_versions: HashMap<(String, String), String> = HashMap::new();
        loop {
            match self.resolve_pass(&state, dependencies, chain, &forced_versions).await {
                Ok(result) => return result,
                Err(overrides) => {
                    for ((group, name), version) in overrides {
                        debug!("forcing {}:{} to {}", group, name, version);
                        forced_versions.insert((group, name), version);
                    }
                }
            }
        }
    }

    /// One breadth-first pass. Returns the version overrides that force a
    /// restart instead of a result when `HighestWins` finds a higher version
    /// than an already selected one.
    async fn resolve_pass(
        &self,
        state: &RunState,
        dependencies: &[Dependency],
        chain: &RepositoryChain,
        forced_versions: &HashMap<(String, String), String>,
    ) -> Result<ResolutionResult, HashMap<(String, String), String>> {
        let mut result = ResolutionResult::default();
        let mut selected: HashMap<(String, String), String> = HashMap::new();
        let mut failed: HashSet<Coordinate> = HashSet::new();
        let mut overrides: HashMap<(String, String), String> = HashMap::new();

        let mut level: Vec<Node> = dependencies
            .iter()
            .map(|d| Node {
                coordinate: self.apply_forced(d.coordinate.clone(), forced_versions),
                scope: d.scope,
                exclusions: d.exclusions.clone(),
            })
            .collect();

        while !level.is_empty() {
            let outcomes = join_all(
                level
                    .iter()
                    .map(|node| self.fetch(state, chain, node.coordinate.clone())),
            )
            .await;

            let mut next_level = Vec::new();
            for (node, outcome) in level.iter().zip(outcomes) {
                let key = node.coordinate.conflict_key();

                if let Some(selected_version) = selected.get(&key) {
                    if *selected_version == node.coordinate.version {
                        continue;
                    }
                    match self.config.conflict_policy {
                        ConflictPolicy::NearestWins => {
                            trace!(
                                "mediated {}: keeping {} over {}",
                                node.coordinate.name,
                                selected_version,
                                node.coordinate.version
                            );
                        }
                        ConflictPolicy::HighestWins => {
                            if compare_versions(&node.coordinate.version, selected_version)
                                == std::cmp::Ordering::Greater
                            {
                                overrides.insert(key, node.coordinate.version.clone());
                            }
                        }
                    }
                    continue;
                }

                match outcome {
                    FetchOutcome::NotFound { reason } => {
                        if failed.insert(node.coordinate.clone()) {
                            result.unresolved.push(UnresolvedDependency {
                                coordinate: node.coordinate.clone(),
                                reason,
                            });
                        }
                    }
                    FetchOutcome::Found { artifact, dependencies } => {
                        selected.insert(key, node.coordinate.version.clone());
                        result.insert(node.scope, artifact);

                        for dependency in dependencies.iter() {
                            if node.exclusions.iter().any(|e| e.excludes(&dependency.coordinate)) {
                                trace!("excluding {} below {}", dependency.coordinate, node.coordinate);
                                continue;
                            }
                            let scope = match dependency.scope.transitive_with(node.scope) {
                                Some(scope) => scope,
                                None => continue,
                            };

                            let mut exclusions = node.exclusions.clone();
                            exclusions.extend(dependency.exclusions.iter().cloned());
                            next_level.push(Node {
                                coordinate: self
                                    .apply_forced(dependency.coordinate.clone(), forced_versions),
                                scope,
                                exclusions,
                            });
                        }
                    }
                }
            }

            if !overrides.is_empty() {
                return Err(overrides);
            }
            level = next_level;
        }

        Ok(result)
    }

    fn apply_forced(
        &self,
        mut coordinate: Coordinate,
        forced_versions: &HashMap<(String, String), String>,
    ) -> Coordinate {
        if let Some(version) = forced_versions.get(&coordinate.conflict_key()) {
            coordinate.version = version.clone();
        }
        coordinate
    }

    /// Fetches a coordinate exactly once per run, no matter how many
    /// traversal paths reach it concurrently.
    async fn fetch(&self, state: &RunState, chain: &RepositoryChain, coordinate: Coordinate) -> FetchOutcome {
        let cell = {
            let mut in_flight = match state.in_flight.lock() {
                Ok(in_flight) => in_flight,
                Err(poisoned) => poisoned.into_inner(),
            };
            in_flight.entry(coordinate.clone()).or_default().clone()
        };

        cell.get_or_init(|| self.fetch_uncached(state, chain, coordinate))
            .await
            .clone()
    }

    async fn fetch_uncached(&self, state: &RunState, chain: &RepositoryChain, coordinate: Coordinate) -> FetchOutcome {
        trace!("resolving {}", coordinate);

        for repository in chain.iter() {
            let snapshot = match self.snapshot_version(state, &coordinate, repository).await {
                Ok(snapshot) => snapshot,
                Err(()) => continue,
            };

            let permit = state.fetch_permits.acquire().await;
            let fetched = self.client.fetch_artifact(&coordinate, repository, snapshot.as_ref()).await;
            drop(permit);

            let fetched = match fetched {
                Some(fetched) => fetched,
                None => continue,
            };

            if self.config.pin_snapshots && coordinate.is_snapshot() {
                let mut pinned = match state.pinned_snapshots.lock() {
                    Ok(pinned) => pinned,
                    Err(poisoned) => poisoned.into_inner(),
                };
                pinned
                    .entry(pin_key(&coordinate))
                    .or_insert_with(|| snapshot.clone());
            }

            let dependencies = if coordinate.extension == "pom" {
                Vec::new()
            } else {
                self.dependencies_of(state, chain, &coordinate, repository, snapshot.as_ref())
                    .await
            };

            debug!("resolved {} at {}", coordinate, fetched.repository);
            return FetchOutcome::Found {
                artifact: Arc::new(ResolvedArtifact {
                    coordinate: coordinate.clone(),
                    path: fetched.path,
                    data: fetched.data,
                    repository: fetched.repository,
                    sha256: fetched.sha256,
                }),
                dependencies: Arc::new(dependencies),
            };
        }

        FetchOutcome::NotFound {
            reason: "not found in any repository".to_string(),
        }
    }

    /// The snapshot version to fetch `coordinate` under at `repository`.
    /// `Ok(None)` means the unqualified (release or mutable snapshot) path;
    /// `Err(())` disqualifies the repository.
    async fn snapshot_version(
        &self,
        state: &RunState,
        coordinate: &Coordinate,
        repository: &crate::repository::Repository,
    ) -> Result<Option<SnapshotVersion>, ()> {
        if !coordinate.is_snapshot() {
            return Ok(None);
        }

        if self.config.pin_snapshots {
            let pinned = match state.pinned_snapshots.lock() {
                Ok(pinned) => pinned,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(snapshot) = pinned.get(&pin_key(coordinate)) {
                return Ok(snapshot.clone());
            }
        }

        match self.client.fetch_snapshot_metadata(coordinate, repository).await {
            Some(SnapshotMetadata::Unique(snapshot)) => Ok(Some(snapshot)),
            Some(SnapshotMetadata::NonUnique) => Ok(None),
            None => Err(()),
        }
    }

    /// The effective dependency declarations of an artifact, from the pom
    /// sitting next to it. An artifact without a pom contributes nothing
    /// transitively.
    async fn dependencies_of(
        &self,
        state: &RunState,
        chain: &RepositoryChain,
        coordinate: &Coordinate,
        repository: &crate::repository::Repository,
        snapshot: Option<&SnapshotVersion>,
    ) -> Vec<Dependency> {
        let pom_coordinate = coordinate.as_pom();
        let fetched = {
            let _permit = state.fetch_permits.acquire().await;
            self.client.fetch_artifact(&pom_coordinate, repository, snapshot).await
        };
        let fetched = match fetched {
            Some(fetched) => fetched,
            None => {
                warn!("no pom for {} at {}", coordinate, repository.name);
                return Vec::new();
            }
        };

        let document = String::from_utf8_lossy(&fetched.data);
        let pom = match parse_pom(&document) {
            Ok(pom) => pom,
            Err(e) => {
                warn!("unusable pom for {}: {}", coordinate, e);
                return Vec::new();
            }
        };

        let parents = self.parent_chain(state, chain, &pom, 0).await;
        pom.effective_dependencies(&parents)
    }

    /// Collects the parent manifests of `pom`, nearest first. Parents are
    /// fetched directly from the chain; the artifact store dedupes repeated
    /// retrievals of shared parents.
    #[async_recursion]
    async fn parent_chain(&self, state: &RunState, chain: &RepositoryChain, pom: &Pom, depth: usize) -> Vec<Pom> {
        const MAX_PARENT_DEPTH: usize = 20;

        let parent_coordinate = match &pom.parent {
            Some(parent) => parent.clone(),
            None => return Vec::new(),
        };
        if depth >= MAX_PARENT_DEPTH {
            warn!("parent chain of {} deeper than {}, truncating", pom.name, MAX_PARENT_DEPTH);
            return Vec::new();
        }

        let mut fetched = None;
        for repository in chain.iter() {
            let _permit = state.fetch_permits.acquire().await;
            if let Some(f) = self.client.fetch_artifact(&parent_coordinate, repository, None).await {
                fetched = Some(f);
                break;
            }
        }
        let fetched = match fetched {
            Some(fetched) => fetched,
            None => {
                warn!("parent pom {} not found in any repository", parent_coordinate);
                return Vec::new();
            }
        };

        let document = String::from_utf8_lossy(&fetched.data);
        let parent_pom = match parse_pom(&document) {
            Ok(parent_pom) => parent_pom,
            Err(e) => {
                warn!("unusable parent pom {}: {}", parent_coordinate, e);
                return Vec::new();
            }
        };

        let mut result = vec![parent_pom];
        let grandparents = self.parent_chain(state, chain, &result[0], depth + 1).await;
        result.extend(grandparents);
        result
    }
}

fn pin_key(coordinate: &Coordinate) -> (String, String, String) {
    (
        coordinate.group.clone(),
        coordinate.name.clone(),
        coordinate.version.clone(),
    )
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::maven::paths::artifact_path;
    use crate::repository::client::ResolutionMode;
    use crate::repository::http::TransientDownloader;
    use crate::repository::store::ArtifactStore;
    use crate::repository::Repository;

    use super::*;

    /// Writes a release artifact plus its pom into a file-system repository.
    fn deploy(root: &Path, coordinate: &Coordinate, pom: &str) {
        let jar = root.join(artifact_path(coordinate, None));
        std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
        std::fs::write(&jar, format!("jar of {}", coordinate)).unwrap();

        let pom_file = root.join(artifact_path(&coordinate.as_pom(), None));
        std::fs::write(&pom_file, pom).unwrap();
    }

    fn pom(coordinate: &Coordinate, dependencies: &[(&Coordinate, &str)]) -> String {
        let mut result = format!(
            "<project><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version><dependencies>",
            coordinate.group, coordinate.name, coordinate.version
        );
        for (dependency, scope) in dependencies {
            result.push_str(&format!(
                "<dependency><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version><scope>{}</scope></dependency>",
                dependency.group, dependency.name, dependency.version, scope
            ));
        }
        result.push_str("</dependencies></project>");
        result
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn resolver(cache: &Path, config: ResolverConfig) -> DependencyResolver {
        init_tracing();
        let client = RepositoryClient::new(
            Arc::new(TransientDownloader::new()),
            Arc::new(ArtifactStore::new(cache)),
            ResolutionMode::Online,
        );
        DependencyResolver::new(Arc::new(client), config)
    }

    fn file_chain(root: &Path) -> RepositoryChain {
        RepositoryChain::new(vec![Repository::local("test-repo", root.to_str().unwrap())])
    }

    /// Publishes an artifact with its manifest and sha1 sidecars on a remote
    /// downloader, returning the artifact's URL.
    fn publish_remote(
        downloader: &TransientDownloader,
        coordinate: &Coordinate,
        document: &str,
    ) -> String {
        let base = "https://repo.example.org/maven2";
        let jar = format!("{}/{}", base, artifact_path(coordinate, None));
        downloader.publish(&*jar, &b"jar bytes"[..]);
        downloader.publish(
            format!("{}.sha1", jar),
            hex::encode(crate::checksum::Digests::of(b"jar bytes").sha1),
        );
        let pom_url = format!("{}/{}", base, artifact_path(&coordinate.as_pom(), None));
        downloader.publish(&*pom_url, document.to_string().into_bytes());
        downloader.publish(
            format!("{}.sha1", pom_url),
            hex::encode(crate::checksum::Digests::of(document.as_bytes()).sha1),
        );
        jar
    }

    #[tokio::test]
    async fn test_transitive_closure_with_scope_propagation() {
        let repo = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        let lib = Coordinate::new("org.example", "lib", "1.0");
        let engine = Coordinate::new("org.example", "engine", "1.0");
        let harness = Coordinate::new("org.example", "harness", "1.0");

        deploy(repo.path(), &app, &pom(&app, &[(&lib, "compile"), (&harness, "test")]));
        deploy(repo.path(), &lib, &pom(&lib, &[(&engine, "runtime")]));
        deploy(repo.path(), &engine, &pom(&engine, &[]));
        deploy(repo.path(), &harness, &pom(&harness, &[]));

        let resolver = resolver(cache.path(), ResolverConfig::default());
        let result = resolver
            .resolve(&[Dependency::new(app.clone())], &file_chain(repo.path()))
            .await;

        result.require_complete().unwrap();

        let compile: Vec<&Coordinate> =
            result.artifacts(Scope::Compile).iter().map(|a| &a.coordinate).collect();
        assert_eq!(compile, vec![&app, &lib]);

        // runtime through a compile edge stays runtime
        let runtime: Vec<&Coordinate> =
            result.artifacts(Scope::Runtime).iter().map(|a| &a.coordinate).collect();
        assert_eq!(runtime, vec![&engine]);

        // test dependencies of a dependency never propagate
        assert!(result.artifacts(Scope::Test).is_empty());
        assert!(result.all_artifacts().all(|a| a.coordinate != harness));
    }

    #[tokio::test]
    async fn test_exclusions_prune_the_subtree() {
        let repo = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        let lib = Coordinate::new("org.example", "lib", "1.0");
        let unwanted = Coordinate::new("org.noise", "unwanted", "1.0");

        deploy(repo.path(), &app, &pom(&app, &[(&lib, "compile")]));
        deploy(repo.path(), &lib, &pom(&lib, &[(&unwanted, "compile")]));
        deploy(repo.path(), &unwanted, &pom(&unwanted, &[]));

        let resolver = resolver(cache.path(), ResolverConfig::default());
        let seed = Dependency::new(app).with_exclusion(Exclusion {
            group: Some("org.noise".to_string()),
            name: None,
        });
        let result = resolver.resolve(&[seed], &file_chain(repo.path())).await;

        result.require_complete().unwrap();
        assert!(result.all_artifacts().all(|a| a.coordinate.group != "org.noise"));
    }

    #[tokio::test]
    async fn test_nearest_version_wins() {
        let repo = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        let lib = Coordinate::new("org.example", "lib", "1.0");
        let util_old = Coordinate::new("org.example", "util", "1.0");
        let util_new = Coordinate::new("org.example", "util", "2.0");

        // util 1.0 is declared at depth 1, util 2.0 only at depth 2
        deploy(repo.path(), &app, &pom(&app, &[(&util_old, "compile"), (&lib, "compile")]));
        deploy(repo.path(), &lib, &pom(&lib, &[(&util_new, "compile")]));
        deploy(repo.path(), &util_old, &pom(&util_old, &[]));
        deploy(repo.path(), &util_new, &pom(&util_new, &[]));

        let resolver = resolver(cache.path(), ResolverConfig::default());
        let result = resolver
            .resolve(&[Dependency::new(app)], &file_chain(repo.path()))
            .await;

        result.require_complete().unwrap();
        let versions: Vec<&str> = result
            .all_artifacts()
            .filter(|a| a.coordinate.name == "util")
            .map(|a| a.coordinate.version.as_str())
            .collect();
        assert_eq!(versions, vec!["1.0"]);
    }

    #[tokio::test]
    async fn test_highest_version_wins_when_configured() {
        let repo = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        let lib = Coordinate::new("org.example", "lib", "1.0");
        let util_old = Coordinate::new("org.example", "util", "1.0");
        let util_new = Coordinate::new("org.example", "util", "2.0");

        deploy(repo.path(), &app, &pom(&app, &[(&util_old, "compile"), (&lib, "compile")]));
        deploy(repo.path(), &lib, &pom(&lib, &[(&util_new, "compile")]));
        deploy(repo.path(), &util_old, &pom(&util_old, &[]));
        deploy(repo.path(), &util_new, &pom(&util_new, &[]));

        let config = ResolverConfig {
            conflict_policy: ConflictPolicy::HighestWins,
            ..ResolverConfig::default()
        };
        let resolver = resolver(cache.path(), config);
        let result = resolver
            .resolve(&[Dependency::new(app)], &file_chain(repo.path()))
            .await;

        result.require_complete().unwrap();
        let versions: Vec<&str> = result
            .all_artifacts()
            .filter(|a| a.coordinate.name == "util")
            .map(|a| a.coordinate.version.as_str())
            .collect();
        assert_eq!(versions, vec!["2.0"]);
    }

    #[tokio::test]
    async fn test_shared_dependency_fetched_once() {
        init_tracing();
        let cache = tempfile::tempdir().unwrap();

        let a = Coordinate::new("org.example", "a", "1.0");
        let b = Coordinate::new("org.example", "b", "1.0");
        let shared = Coordinate::new("org.example", "shared", "1.0");

        let downloader = Arc::new(TransientDownloader::new());
        publish_remote(&downloader, &a, &pom(&a, &[(&shared, "compile")]));
        publish_remote(&downloader, &b, &pom(&b, &[(&shared, "compile")]));
        let shared_jar = publish_remote(&downloader, &shared, &pom(&shared, &[]));

        let chain = RepositoryChain::new(vec![Repository::remote(
            "central",
            "https://repo.example.org/maven2",
            None,
        )]);
        let resolver = DependencyResolver::new(
            Arc::new(RepositoryClient::new(
                downloader.clone(),
                Arc::new(ArtifactStore::new(cache.path())),
                ResolutionMode::Online,
            )),
            ResolverConfig::default(),
        );
        let result = resolver
            .resolve(&[Dependency::new(a), Dependency::new(b)], &chain)
            .await;

        result.require_complete().unwrap();
        let shared_artifacts: Vec<_> = result
            .all_artifacts()
            .filter(|a| a.coordinate.name == "shared")
            .collect();
        assert_eq!(shared_artifacts.len(), 1);

        // both parents reach it concurrently, the document goes over the wire once
        assert_eq!(downloader.fetch_count(&shared_jar), 1);
    }

    #[tokio::test]
    async fn test_offline_round_trip_from_the_cache() {
        init_tracing();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        let lib = Coordinate::new("org.example", "lib", "1.0");

        let downloader = Arc::new(TransientDownloader::new());
        publish_remote(&downloader, &app, &pom(&app, &[(&lib, "compile")]));
        publish_remote(&downloader, &lib, &pom(&lib, &[]));

        let chain = RepositoryChain::new(vec![Repository::remote(
            "central",
            "https://repo.example.org/maven2",
            None,
        )]);

        let online = DependencyResolver::new(
            Arc::new(RepositoryClient::new(
                downloader,
                Arc::new(ArtifactStore::new(cache.path())),
                ResolutionMode::Online,
            )),
            ResolverConfig::default(),
        );
        let first = online.resolve(&[Dependency::new(app.clone())], &chain).await;
        first.require_complete().unwrap();

        // nothing reachable remotely anymore, the cache must answer alone
        let offline = DependencyResolver::new(
            Arc::new(RepositoryClient::new(
                Arc::new(TransientDownloader::new()),
                Arc::new(ArtifactStore::new(cache.path())),
                ResolutionMode::Offline,
            )),
            ResolverConfig::default(),
        );
        let second = offline.resolve(&[Dependency::new(app)], &chain).await;
        second.require_complete().unwrap();

        let coordinates = |result: &ResolutionResult| {
            result
                .all_artifacts()
                .map(|a| a.coordinate.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(coordinates(&first), coordinates(&second));
    }

    #[tokio::test]
    async fn test_missing_artifacts_are_aggregated() {
        let repo = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        let ghost = Coordinate::new("org.example", "ghost", "1.0");
        let phantom = Coordinate::new("org.example", "phantom", "1.0");
        deploy(repo.path(), &app, &pom(&app, &[(&ghost, "compile"), (&phantom, "compile")]));

        let resolver = resolver(cache.path(), ResolverConfig::default());
        let result = resolver
            .resolve(&[Dependency::new(app)], &file_chain(repo.path()))
            .await;

        assert!(!result.is_complete());
        assert_eq!(result.unresolved().len(), 2);

        let error = result.require_complete().unwrap_err().to_string();
        assert!(error.contains("org.example:ghost:1.0"));
        assert!(error.contains("org.example:phantom:1.0"));
    }

    #[tokio::test]
    async fn test_later_repository_answers_when_earlier_lacks_artifact() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let app = Coordinate::new("org.example", "app", "1.0");
        deploy(second.path(), &app, &pom(&app, &[]));

        let chain = RepositoryChain::new(vec![
            Repository::local("first", first.path().to_str().unwrap()),
            Repository::local("second", second.path().to_str().unwrap()),
        ]);

        let resolver = resolver(cache.path(), ResolverConfig::default());
        let result = resolver.resolve(&[Dependency::new(app)], &chain).await;

        result.require_complete().unwrap();
        assert_eq!(result.all_artifacts().next().unwrap().repository, "second");
    }

    #[tokio::test]
    async fn test_parent_pom_supplies_versions() {
        let repo = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let parent = Coordinate::new("org.example", "parent", "1.0").with_extension("pom");
        let child = Coordinate::new("org.example", "child", "1.0");
        let util = Coordinate::new("org.example", "util", "3.0");

        let parent_pom = "<project>\
            <groupId>org.example</groupId><artifactId>parent</artifactId><version>1.0</version>\
            <packaging>pom</packaging>\
            <dependencyManagement><dependencies><dependency>\
              <groupId>org.example</groupId><artifactId>util</artifactId><version>3.0</version>\
            </dependency></dependencies></dependencyManagement>\
            </project>";
        let pom_file = repo.path().join(artifact_path(&parent, None));
        std::fs::create_dir_all(pom_file.parent().unwrap()).unwrap();
        std::fs::write(&pom_file, parent_pom).unwrap();

        let child_pom = "<project>\
            <artifactId>child</artifactId>\
            <parent><groupId>org.example</groupId><artifactId>parent</artifactId><version>1.0</version></parent>\
            <dependencies><dependency>\
              <groupId>org.example</groupId><artifactId>util</artifactId>\
            </dependency></dependencies>\
            </project>";
        deploy(repo.path(), &child, child_pom);
        deploy(repo.path(), &util, &pom(&util, &[]));

        let resolver = resolver(cache.path(), ResolverConfig::default());
        let result = resolver
            .resolve(&[Dependency::new(child)], &file_chain(repo.path()))
            .await;

        result.require_complete().unwrap();
        assert!(result.all_artifacts().any(|a| a.coordinate == util));
    }
}
