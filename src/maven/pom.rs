use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::maven::coordinates::{Coordinate, Dependency, Exclusion, Scope};

/// A parsed package manifest, before parent inheritance is applied.
///
/// Group and version may be absent when they are inherited from the parent;
/// * [Pom::effective_dependencies] needs the full parent chain to produce
///   usable dependency declarations.
#[derive(Debug, Clone)]
pub struct Pom {
    pub group: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub packaging: String,
    pub parent: Option<Coordinate>,
    properties: HashMap<String, String>,
    dependencies: Vec<PomDependency>,
    dependency_management: Vec<PomDependency>,
}

#[derive(Debug, Clone)]
struct PomDependency {
    group: String,
    name: String,
    version: Option<String>,
    classifier: Option<String>,
    extension: Option<String>,
    scope: Option<String>,
    optional: bool,
    exclusions: Vec<Exclusion>,
}

pub fn parse_pom(document: &str) -> anyhow::Result<Pom> {
    let project: xml::Project = serde_xml_rs::from_str(document)
        .map_err(|e| anyhow!("not a parseable pom: {}", e))?;

    let parent = project.parent.as_ref().map(|p| {
        Coordinate::new(p.groupId.clone(), p.artifactId.clone(), p.version.clone()).as_pom()
    });

    Ok(Pom {
        group: project.groupId,
        name: project.artifactId,
        version: project.version,
        packaging: project.packaging.unwrap_or_else(|| "jar".to_string()),
        parent,
        properties: project.properties.unwrap_or_default(),
        dependencies: project
            .dependencies
            .map(|d| d.dependency.into_iter().map(PomDependency::from).collect())
            .unwrap_or_default(),
        dependency_management: project
            .dependencyManagement
            .and_then(|m| m.dependencies)
            .map(|d| d.dependency.into_iter().map(PomDependency::from).collect())
            .unwrap_or_default(),
    })
}

impl Pom {
    /// The coordinate this manifest describes, with group and version falling
    /// back to the parent declaration.
    pub fn effective_coordinate(&self) -> anyhow::Result<Coordinate> {
        let group = self
            .group
            .clone()
            .or_else(|| self.parent.as_ref().map(|p| p.group.clone()))
            .ok_or_else(|| anyhow!("pom for {} declares no group", self.name))?;
        let version = self
            .version
            .clone()
            .or_else(|| self.parent.as_ref().map(|p| p.version.clone()))
            .ok_or_else(|| anyhow!("pom for {} declares no version", self.name))?;
        Ok(Coordinate::new(group, self.name.clone(), version))
    }

    /// The dependency declarations of this manifest after applying the parent
    /// chain: property interpolation, version fill-in from dependency
    /// management, and dropping of optional and non-transitive entries.
    ///
    /// `parents` is the parent chain nearest first. Declarations that remain
    /// unusable (no version anywhere, unsupported scope) are logged and
    /// skipped rather than failing the whole manifest.
    pub fn effective_dependencies(&self, parents: &[Pom]) -> Vec<Dependency> {
        let interpolator = Interpolator::new(self, parents);

        let mut managed_versions = HashMap::new();
        for pom in std::iter::once(self).chain(parents.iter()) {
            for managed in &pom.dependency_management {
                if let Some(version) = &managed.version {
                    managed_versions
                        .entry((
                            interpolator.interpolate(&managed.group),
                            interpolator.interpolate(&managed.name),
                        ))
                        .or_insert_with(|| interpolator.interpolate(version));
                }
            }
        }

        let mut result = Vec::new();
        for raw in self.dependencies.iter().chain(parents.iter().flat_map(|p| p.dependencies.iter())) {
            if raw.optional {
                continue;
            }

            let group = interpolator.interpolate(&raw.group);
            let name = interpolator.interpolate(&raw.name);

            let scope = match raw.scope.as_deref() {
                None => Scope::Compile,
                Some(s) => match interpolator.interpolate(s).parse::<Scope>() {
                    Ok(scope) => scope,
                    Err(_) => {
                        warn!("skipping dependency {}:{} with unsupported scope {:?}", group, name, s);
                        continue;
                    }
                },
            };

            let version = raw
                .version
                .as_ref()
                .map(|v| interpolator.interpolate(v))
                .or_else(|| managed_versions.get(&(group.clone(), name.clone())).cloned());
            let version = match version {
                Some(version) => version,
                None => {
                    warn!("skipping dependency {}:{} without a version", group, name);
                    continue;
                }
            };

            let mut coordinate = Coordinate::new(group, name, version);
            if let Some(classifier) = &raw.classifier {
                coordinate = coordinate.with_classifier(interpolator.interpolate(classifier));
            }
            if let Some(extension) = &raw.extension {
                coordinate = coordinate.with_extension(interpolator.interpolate(extension));
            }

            let mut dependency = Dependency::new(coordinate).with_scope(scope);
            for exclusion in &raw.exclusions {
                dependency = dependency.with_exclusion(exclusion.clone());
            }
            result.push(dependency);
        }
        result
    }
}

lazy_static! {
    static ref PROPERTY_REFERENCE: Regex = Regex::new(r"^\$\{(.+)\}$").unwrap();
}

/// Property lookup for `${...}` references, searching the manifest's own
/// properties before the parent chain's. Only values that are a single
/// property reference are substituted, partial references stay literal.
struct Interpolator<'a> {
    pom: &'a Pom,
    parents: &'a [Pom],
}

impl<'a> Interpolator<'a> {
    fn new(pom: &'a Pom, parents: &'a [Pom]) -> Interpolator<'a> {
        Interpolator { pom, parents }
    }

    fn interpolate(&self, value: &str) -> String {
        let mut seen = HashSet::new();
        let mut current = value.to_string();
        loop {
            let key = match PROPERTY_REFERENCE.captures(&current) {
                Some(captures) => captures.get(1).unwrap().as_str().to_string(),
                None => return current,
            };
            if !seen.insert(key.clone()) {
                warn!("cyclic property reference {}", value);
                return value.to_string();
            }
            match self.lookup(&key) {
                Some(resolved) => current = resolved,
                None => {
                    warn!("unresolvable property reference {}", current);
                    return current;
                }
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(builtin) = self.builtin(key) {
            return Some(builtin);
        }
        std::iter::once(self.pom)
            .chain(self.parents.iter())
            .find_map(|pom| pom.properties.get(key).cloned())
    }

    fn builtin(&self, key: &str) -> Option<String> {
        let chain = || std::iter::once(self.pom).chain(self.parents.iter());
        match key {
            "project.groupId" | "pom.groupId" => chain().find_map(|p| p.group.clone()),
            "project.artifactId" | "pom.artifactId" => Some(self.pom.name.clone()),
            "project.version" | "pom.version" => chain().find_map(|p| p.version.clone()),
            "project.parent.version" => self.pom.parent.as_ref().map(|p| p.version.clone()),
            "project.parent.groupId" => self.pom.parent.as_ref().map(|p| p.group.clone()),
            _ => None,
        }
    }
}

impl From<xml::Dependency> for PomDependency {
    fn from(d: xml::Dependency) -> PomDependency {
        PomDependency {
            group: d.groupId,
            name: d.artifactId,
            version: d.version,
            classifier: d.classifier,
            extension: d.r#type,
            scope: d.scope,
            optional: d.optional.as_deref() == Some("true"),
            exclusions: d
                .exclusions
                .map(|e| e.exclusion.into_iter().map(xml::Exclusion::into_exclusion).collect())
                .unwrap_or_default(),
        }
    }
}

// Field names follow the pom schema, see
// https://maven.apache.org/ref/3.9.5/maven-model/maven.html
#[allow(non_snake_case)]
mod xml {
    use std::collections::HashMap;

    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Project {
        pub groupId: Option<String>,
        pub artifactId: String,
        pub version: Option<String>,
        pub packaging: Option<String>,
        pub parent: Option<Parent>,
        pub properties: Option<HashMap<String, String>>,
        pub dependencies: Option<Dependencies>,
        pub dependencyManagement: Option<DependencyManagement>,
    }

    #[derive(Deserialize)]
    pub struct Parent {
        pub groupId: String,
        pub artifactId: String,
        pub version: String,
    }

    #[derive(Deserialize)]
    pub struct DependencyManagement {
        pub dependencies: Option<Dependencies>,
    }

    #[derive(Deserialize)]
    pub struct Dependencies {
        #[serde(default)]
        pub dependency: Vec<Dependency>,
    }

    #[derive(Deserialize)]
    pub struct Dependency {
        pub groupId: String,
        pub artifactId: String,
        pub version: Option<String>,
        pub classifier: Option<String>,
        pub r#type: Option<String>,
        pub scope: Option<String>,
        pub optional: Option<String>,
        pub exclusions: Option<Exclusions>,
    }

    #[derive(Deserialize)]
    pub struct Exclusions {
        #[serde(default)]
        pub exclusion: Vec<Exclusion>,
    }

    #[derive(Deserialize)]
    pub struct Exclusion {
        pub groupId: Option<String>,
        pub artifactId: Option<String>,
    }

    impl Exclusion {
        pub fn into_exclusion(self) -> crate::maven::coordinates::Exclusion {
            let widen = |part: Option<String>| part.filter(|p| p != "*");
            crate::maven::coordinates::Exclusion {
                group: widen(self.groupId),
                name: widen(self.artifactId),
            }
        }
    }
}
