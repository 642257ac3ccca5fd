//! Operation registry - parses declarative operation definitions
//!
//! Sources are YAML sequences of records:
//!
//! ```yaml
//! - name: hdfs_install
//!   depends_on: []
//! - name: hdfs_config
//!   depends_on: [hdfs_install]
//! - name: hdfs_init
//!   depends_on: [hdfs_start]
//!   noop: true
//! ```
//!
//! Several sources can be loaded in order. A name declared by two sources is
//! reported as a duplicate naming both.

use crate::error::{Error, Result, ValidationError, ValidationIssue};
use crate::operation::{Operation, OperationKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw record as it appears in an operation source
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub noop: bool,
}

/// Validated set of operations, unique by name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    operations: Vec<Operation>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a single list of records
    pub fn from_specs(source: &str, specs: Vec<OperationSpec>) -> Result<Self> {
        let mut builder = RegistryBuilder::default();
        builder.add_specs(source, specs);
        builder.finish()
    }

    /// Build a registry from YAML text
    pub fn from_yaml_str(source: &str, yaml: &str) -> Result<Self> {
        let mut builder = RegistryBuilder::default();
        builder.add_yaml(source, yaml)?;
        builder.finish()
    }

    /// Load operation sources from files or directories, in order
    ///
    /// Directories contribute their `*.yml`/`*.yaml` files sorted by name.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut builder = RegistryBuilder::default();
        for path in paths {
            for file in source_files(path.as_ref())? {
                let content = fs::read_to_string(&file)?;
                log::debug!("Loading operations from {}", file.display());
                builder.add_yaml(&file.display().to_string(), &content)?;
            }
        }
        builder.finish()
    }

    /// Build a registry from already validated operations
    pub fn from_operations(operations: Vec<Operation>) -> Result<Self> {
        let mut builder = RegistryBuilder::default();
        for operation in operations {
            let source = operation.source().to_string();
            builder.push(&source, operation);
        }
        builder.finish()
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Operations in declaration order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}

#[derive(Default)]
struct RegistryBuilder {
    operations: Vec<Operation>,
    index: HashMap<String, usize>,
    issues: Vec<ValidationIssue>,
}

impl RegistryBuilder {
    /// Add every record of a YAML source
    ///
    /// Only a document that is not a sequence fails as a whole; each bad
    /// record becomes an issue carrying its own index.
    fn add_yaml(&mut self, source: &str, yaml: &str) -> Result<()> {
        let records = parse_records(source, yaml).map_err(|e| Error::Yaml {
            path: PathBuf::from(source),
            source: e,
        })?;
        for (index, record) in records.into_iter().enumerate() {
            let parsed = serde_yaml::from_value::<OperationSpec>(record)
                .map_err(|e| e.to_string())
                .and_then(operation_from_spec);
            self.add_parsed(source, index, parsed);
        }
        Ok(())
    }

    fn add_specs(&mut self, source: &str, specs: Vec<OperationSpec>) {
        for (index, spec) in specs.into_iter().enumerate() {
            self.add_parsed(source, index, operation_from_spec(spec));
        }
    }

    fn add_parsed(
        &mut self,
        source: &str,
        index: usize,
        parsed: std::result::Result<Operation, String>,
    ) {
        match parsed {
            Ok(operation) => self.push(source, operation.with_source(source)),
            Err(reason) => self.issues.push(ValidationIssue::MalformedRecord {
                source_name: source.to_string(),
                index,
                reason,
            }),
        }
    }

    fn push(&mut self, source: &str, operation: Operation) {
        let name = operation.name().to_string();
        if let Some(&existing) = self.index.get(&name) {
            self.issues.push(ValidationIssue::DuplicateOperation {
                name,
                first: self.operations[existing].source().to_string(),
                second: source.to_string(),
            });
            return;
        }
        self.index.insert(name, self.operations.len());
        self.operations.push(operation);
    }

    fn finish(self) -> Result<Registry> {
        if !self.issues.is_empty() {
            return Err(ValidationError::new(self.issues).into());
        }
        Ok(Registry {
            operations: self.operations,
            index: self.index,
        })
    }
}

/// Split a source into its raw records
fn parse_records(
    source: &str,
    yaml: &str,
) -> std::result::Result<Vec<serde_yaml::Value>, serde_yaml::Error> {
    if yaml.trim().is_empty() {
        log::debug!("Operation source {source} is empty");
        return Ok(Vec::new());
    }
    serde_yaml::from_str(yaml)
}

fn operation_from_spec(spec: OperationSpec) -> std::result::Result<Operation, String> {
    let key = OperationKey::parse(&spec.name)?;
    let depends_on = spec
        .depends_on
        .iter()
        .map(|dep| {
            OperationKey::parse(dep).map_err(|e| format!("dependency of '{}': {e}", spec.name))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Operation::new(key, depends_on, spec.noop))
}

/// Expand a source path into the YAML files it designates
fn source_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e == "yml" || e == "yaml")
            })
            .collect();
        files.sort();
        Ok(files)
    } else {
        Ok(vec![path.to_path_buf()])
    }
}
