//! Operation identity and records
//!
//! An operation is named `service_action` or `service_component_action`.
//! The name is parsed once into its parts so nothing downstream has to
//! pattern-match on strings.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Longest accepted operation name
pub const OPERATION_NAME_MAX_LENGTH: usize = 50;

/// Lifecycle actions every service must declare, in dependency order
pub const LIFECYCLE_ACTIONS: [&str; 4] = ["install", "config", "start", "init"];

/// Composite operation key: `(service, component, action)`
///
/// Equality, hashing and ordering all go through the full name, so keys
/// sort lexicographically by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationKey {
    name: String,
    service: String,
    component: Option<String>,
    action: String,
}

impl OperationKey {
    /// Parse an operation name
    pub fn parse(name: &str) -> Result<Self, String> {
        if name.is_empty() {
            return Err("operation name cannot be empty".to_string());
        }
        if name.len() > OPERATION_NAME_MAX_LENGTH {
            return Err(format!(
                "'{name}' is longer than {OPERATION_NAME_MAX_LENGTH} characters"
            ));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(format!("'{name}' contains invalid character '{bad}'"));
        }

        let parts: Vec<&str> = name.split('_').collect();
        if parts.len() < 2 {
            return Err(format!(
                "'{name}' must be named service_action or service_component_action"
            ));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(format!("'{name}' contains an empty name segment"));
        }

        let service = parts[0].to_string();
        let action = parts[parts.len() - 1].to_string();
        let component = if parts.len() > 2 {
            Some(parts[1..parts.len() - 1].join("_"))
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            service,
            component,
            action,
        })
    }

    /// Full operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning service
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Component, `None` for service-level operations
    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    /// Action (last name segment)
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Whether this is a service-level operation (`service_action`)
    pub fn is_service_level(&self) -> bool {
        self.component.is_none()
    }

    /// Key of the same entity with another action
    pub fn with_action(&self, action: &str) -> Self {
        let name = match &self.component {
            Some(component) => format!("{}_{}_{}", self.service, component, action),
            None => format!("{}_{}", self.service, action),
        };
        Self {
            name,
            service: self.service.clone(),
            component: self.component.clone(),
            action: action.to_string(),
        }
    }
}

impl PartialEq for OperationKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for OperationKey {}

impl Hash for OperationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for OperationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OperationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for OperationKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OperationKey> for String {
    fn from(key: OperationKey) -> Self {
        key.name
    }
}

impl std::str::FromStr for OperationKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A validated operation record
///
/// Created once when the registry is built and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    key: OperationKey,
    depends_on: Vec<OperationKey>,
    noop: bool,
    source: String,
}

impl Operation {
    /// Create an operation, dropping repeated dependencies
    pub fn new(key: OperationKey, depends_on: Vec<OperationKey>, noop: bool) -> Self {
        let mut deduped: Vec<OperationKey> = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            if !deduped.contains(&dep) {
                deduped.push(dep);
            }
        }
        Self {
            key,
            depends_on: deduped,
            noop,
            source: String::new(),
        }
    }

    /// Record which source declared this operation
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// Declared dependencies, in declaration order
    pub fn depends_on(&self) -> &[OperationKey] {
        &self.depends_on
    }

    /// No-op operations take part in ordering but have no effect
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// Name of the source that declared the operation
    pub fn source(&self) -> &str {
        &self.source
    }
}
