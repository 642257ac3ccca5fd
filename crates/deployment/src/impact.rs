//! Reconfiguration impact - which operations must re-run after a change
//!
//! For every changed service the configuration store reports which files
//! changed. A [`FileMapper`] maps each file to the component it configures,
//! which designates a `config` operation. Everything reachable forward from
//! those operations is impacted.

use crate::error::{Error, Result};
use confstore::{VersionId, VersionedConfig};
use opgraph::{DependencyGraph, OperationKey};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Maps a changed configuration file to the components it configures
///
/// `None` stands for the service-level configuration.
pub trait FileMapper: Send + Sync {
    fn components_for(&self, service: &str, path: &str) -> Vec<Option<String>>;
}

impl<F> FileMapper for F
where
    F: Fn(&str, &str) -> Vec<Option<String>> + Send + Sync,
{
    fn components_for(&self, service: &str, path: &str) -> Vec<Option<String>> {
        self(service, path)
    }
}

/// Maps every file to the service-level configuration
pub struct ServiceLevelMapper;

impl FileMapper for ServiceLevelMapper {
    fn components_for(&self, _service: &str, _path: &str) -> Vec<Option<String>> {
        vec![None]
    }
}

/// A service whose configuration moved between two versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChange {
    pub service: String,
    /// Version last deployed, `None` if never deployed
    pub from: Option<VersionId>,
    pub to: VersionId,
}

/// Operations impacted by a set of changes
#[derive(Debug, Clone, Default)]
pub struct ImpactSet {
    /// Services whose change contributed
    pub services: BTreeSet<String>,
    /// Changed files per service
    pub changed_files: BTreeMap<String, BTreeSet<String>>,
    /// Operations the changes map to directly
    pub seeds: BTreeSet<OperationKey>,
    /// Forward closure of the seeds, no-ops included
    pub reachable: BTreeSet<OperationKey>,
    /// `reachable` without no-ops
    pub executable: BTreeSet<OperationKey>,
}

impl ImpactSet {
    pub fn is_empty(&self) -> bool {
        self.executable.is_empty()
    }

    /// Services and `service_component` names touched by reachable operations
    pub fn touched(&self) -> BTreeSet<String> {
        touched_names(&self.reachable)
    }
}

/// Resolves changed services into impacted operations
pub struct ImpactResolver<'a> {
    graph: &'a DependencyGraph,
    versions: &'a dyn VersionedConfig,
    mapper: &'a dyn FileMapper,
}

impl<'a> ImpactResolver<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        versions: &'a dyn VersionedConfig,
        mapper: &'a dyn FileMapper,
    ) -> Self {
        Self {
            graph,
            versions,
            mapper,
        }
    }

    /// Operations that must re-run for `changes`
    ///
    /// Configuration store errors are returned as-is: an unknown service or
    /// version makes the whole computation invalid.
    pub fn resolve(&self, changes: &[ServiceChange]) -> Result<ImpactSet> {
        let per_service = changes
            .par_iter()
            .map(|change| self.seeds_for(change))
            .collect::<Result<Vec<_>>>()?;

        let mut impact = ImpactSet::default();
        for (change, files, seeds) in per_service {
            if seeds.is_empty() {
                log::debug!("No operation impacted by {}", change.service);
                continue;
            }
            impact.services.insert(change.service.clone());
            if let Some(files) = files {
                impact.changed_files.insert(change.service.clone(), files);
            }
            impact.seeds.extend(seeds);
        }

        for seed in &impact.seeds {
            impact.reachable.extend(self.graph.descendants_of(seed.name())?);
        }
        impact.executable = impact
            .reachable
            .iter()
            .filter(|key| self.graph.get(key.name()).is_some_and(|op| !op.is_noop()))
            .cloned()
            .collect();

        log::info!(
            "{} change(s) impact {} operation(s), {} executable",
            changes.len(),
            impact.reachable.len(),
            impact.executable.len()
        );
        Ok(impact)
    }

    #[allow(clippy::type_complexity)]
    fn seeds_for<'c>(
        &self,
        change: &'c ServiceChange,
    ) -> Result<(&'c ServiceChange, Option<BTreeSet<String>>, Vec<OperationKey>)> {
        let Some(from) = &change.from else {
            // Never deployed: everything of the service
            let seeds = self
                .graph
                .operations_of(&change.service)
                .into_iter()
                .filter(|op| matches!(op.key().action(), "install" | "config"))
                .map(|op| op.key().clone())
                .collect();
            return Ok((change, None, seeds));
        };

        let files = self.versions.diff(&change.service, from, &change.to)?;
        let mut seeds = BTreeSet::new();
        for path in &files {
            for component in self.mapper.components_for(&change.service, path) {
                if let Some(key) = self.config_operation(&change.service, component.as_deref()) {
                    seeds.insert(key);
                } else {
                    log::warn!(
                        "{}: no config operation for {} in the graph",
                        change.service,
                        path
                    );
                }
            }
        }
        Ok((change, Some(files), seeds.into_iter().collect()))
    }

    /// `service_component_config`, falling back to `service_config`
    fn config_operation(&self, service: &str, component: Option<&str>) -> Option<OperationKey> {
        let service_level = format!("{service}_config");
        let candidates = match component {
            Some(component) => vec![format!("{service}_{component}_config"), service_level],
            None => vec![service_level],
        };
        candidates
            .iter()
            .find_map(|name| self.graph.get(name))
            .map(|op| op.key().clone())
    }
}

/// Services whose current version differs from the one last deployed
///
/// Services without any configuration history are skipped.
pub fn pending_changes<S: AsRef<str>>(
    versions: &dyn VersionedConfig,
    deployed: &BTreeMap<String, VersionId>,
    services: &[S],
) -> Result<Vec<ServiceChange>> {
    let mut changes = Vec::new();
    for service in services {
        let service = service.as_ref();
        let current = match versions.current_version(service) {
            Ok(version) => version,
            Err(confstore::Error::UnknownService { .. }) => {
                log::debug!("{service} has no configuration history");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let from = deployed.get(service).cloned();
        if from.as_ref() == Some(&current) {
            continue;
        }
        changes.push(ServiceChange {
            service: service.to_string(),
            from,
            to: current,
        });
    }
    Ok(changes)
}

fn touched_names(keys: &BTreeSet<OperationKey>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for key in keys {
        names.insert(key.service().to_string());
        if let Some(component) = key.component() {
            names.insert(format!("{}_{}", key.service(), component));
        }
    }
    names
}

/// Expected reach of reconfiguring one service or component
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconfigureRule {
    #[serde(default)]
    pub must_include: BTreeSet<String>,
    #[serde(default)]
    pub must_exclude: BTreeSet<String>,
}

/// Rules keyed by the reconfigured service or `service_component`
///
/// ```yaml
/// hdfs:
///   must_include: [yarn, hive_hiveserver2]
///   must_exclude: [zookeeper]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    pub rules: BTreeMap<String, ReconfigureRule>,
}

impl RuleSet {
    pub fn from_yaml_str(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content).map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A reconfiguration rule that does not hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    /// A name is both required and forbidden
    Overlap { source: String, name: String },
    /// Reconfiguring `source` does not reach `name`
    MustIncludeMissing { source: String, name: String },
    /// Reconfiguring `source` reaches `name`
    MustExcludePresent { source: String, name: String },
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap { source, name } => {
                write!(f, "{source}: {name} is both in must_include and must_exclude")
            }
            Self::MustIncludeMissing { source, name } => {
                write!(f, "{source} reconfiguration should include {name}")
            }
            Self::MustExcludePresent { source, name } => {
                write!(f, "{source} reconfiguration should not include {name}")
            }
        }
    }
}

/// Check every rule against the graph's reachability
///
/// A source service seeds all its `config` operations; a source component
/// seeds its own `config` operation.
pub fn verify_rules(graph: &DependencyGraph, rules: &RuleSet) -> Result<Vec<RuleViolation>> {
    let mut violations = Vec::new();

    for (source, rule) in &rules.rules {
        for name in rule.must_include.intersection(&rule.must_exclude) {
            violations.push(RuleViolation::Overlap {
                source: source.clone(),
                name: name.clone(),
            });
        }

        let seeds: Vec<&str> = if graph.services().contains(source.as_str()) {
            graph
                .operations_of(source)
                .into_iter()
                .filter(|op| op.key().action() == "config")
                .map(|op| op.name())
                .collect()
        } else {
            let name = format!("{source}_config");
            match graph.get(&name) {
                Some(op) => vec![op.name()],
                None => return Err(opgraph::Error::UnknownOperation { name }.into()),
            }
        };

        let mut reachable = BTreeSet::new();
        for seed in seeds {
            reachable.extend(graph.descendants_of(seed)?);
        }
        let touched = touched_names(&reachable);

        for name in &rule.must_include {
            if !touched.contains(name) {
                violations.push(RuleViolation::MustIncludeMissing {
                    source: source.clone(),
                    name: name.clone(),
                });
            }
        }
        for name in &rule.must_exclude {
            if touched.contains(name) {
                violations.push(RuleViolation::MustExcludePresent {
                    source: source.clone(),
                    name: name.clone(),
                });
            }
        }
    }

    Ok(violations)
}
