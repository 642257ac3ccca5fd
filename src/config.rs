//! tdeploy configuration (`tdeploy.toml`)
//!
//! ```toml
//! operations = ["operations/", "extra.yml"]
//! database = "~/.local/state/tdeploy/tdeploy.db"
//! strict_lifecycle = true
//!
//! [executor]
//! program = "ansible-playbook"
//! args = ["playbooks/{operation}.yml"]
//! working_dir = "/srv/deploy"
//!
//! [[mapping]]
//! service = "hdfs"
//! pattern = "*namenode*"
//! component = "namenode"
//! ```

use anyhow::{Context, Result};
use deployment::FileMapper;
use opgraph::{DependencyGraph, Registry, RulePolicy, glob_to_regex};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

/// Placeholder substituted with the operation name in executor arguments
pub const OPERATION_PLACEHOLDER: &str = "{operation}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TdeployConfig {
    /// Operation definition files or directories, loaded in order
    #[serde(default)]
    pub operations: Vec<String>,

    /// SQLite database holding deployments and configuration history
    #[serde(default)]
    pub database: Option<String>,

    /// Fail on lifecycle and structural rule violations instead of warning
    #[serde(default = "default_true")]
    pub strict_lifecycle: bool,

    #[serde(default)]
    pub executor: Option<ExecutorConfig>,

    /// File to component association used by `reconfigure`
    #[serde(default)]
    pub mapping: Vec<MappingRule>,
}

fn default_true() -> bool {
    true
}

impl Default for TdeployConfig {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            database: None,
            strict_lifecycle: true,
            executor: None,
            mapping: Vec::new(),
        }
    }
}

/// External program run once per operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingRule {
    pub service: String,
    /// Glob on the configuration file path
    pub pattern: String,
    /// Component configured by matching files, service level if absent
    #[serde(default)]
    pub component: Option<String>,
}

/// Config plus where it was read from
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: TdeployConfig,
    /// File the config came from, `None` when defaults are used
    pub path: Option<PathBuf>,
}

impl LoadedConfig {
    /// Locate and parse the config file, falling back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match paths::config_file(explicit)? {
            Some(path) => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Could not read {}", path.display()))?;
                let config = Self::parse(&content)
                    .with_context(|| format!("Invalid config in {}", path.display()))?;
                log::debug!("Loaded config from {}", path.display());
                Ok(Self {
                    config,
                    path: Some(path),
                })
            }
            None => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> Result<TdeployConfig> {
        toml::from_str(content).context("Invalid TOML format in tdeploy config")
    }

    fn base_dir(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Operation sources, resolved against the config file's directory
    pub fn operation_sources(&self) -> Vec<PathBuf> {
        self.config
            .operations
            .iter()
            .map(|p| paths::resolve(self.base_dir(), p))
            .collect()
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.config.database {
            Some(db) => Ok(paths::resolve(self.base_dir(), db)),
            None => paths::default_database(),
        }
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        self.config
            .executor
            .as_ref()
            .and_then(|e| e.working_dir.as_deref())
            .map(|dir| paths::resolve(self.base_dir(), dir))
    }

    pub fn policy(&self) -> RulePolicy {
        if self.config.strict_lifecycle {
            RulePolicy::strict()
        } else {
            RulePolicy::lenient()
        }
    }

    /// Load the operation sources and build the dependency graph
    pub fn graph(&self) -> Result<DependencyGraph> {
        let sources = self.operation_sources();
        if sources.is_empty() {
            anyhow::bail!("No operation sources configured (set `operations` in tdeploy.toml)");
        }
        let registry = Registry::load(&sources).context("Could not load operations")?;
        let graph = DependencyGraph::build_with(&registry, self.policy())?;
        log::info!(
            "Loaded {} operations from {} source(s)",
            graph.len(),
            sources.len()
        );
        Ok(graph)
    }

    /// Compile the `[[mapping]]` rules
    pub fn mapper(&self) -> Result<GlobMapper> {
        GlobMapper::new(&self.config.mapping)
    }
}

/// Maps configuration files to components through glob rules
///
/// Files matching no rule configure the service as a whole.
pub struct GlobMapper {
    rules: Vec<(String, Regex, Option<String>)>,
}

impl GlobMapper {
    pub fn new(rules: &[MappingRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&glob_to_regex(&rule.pattern))
                    .with_context(|| format!("Invalid mapping pattern '{}'", rule.pattern))?;
                Ok((rule.service.clone(), regex, rule.component.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }
}

impl FileMapper for GlobMapper {
    fn components_for(&self, service: &str, path: &str) -> Vec<Option<String>> {
        let matched: Vec<Option<String>> = self
            .rules
            .iter()
            .filter(|(s, regex, _)| s == service && regex.is_match(path))
            .map(|(_, _, component)| component.clone())
            .collect();
        if matched.is_empty() {
            vec![None]
        } else {
            matched
        }
    }
}
