//! Error types for registry loading and graph construction.
//!
//! Construction problems are collected into a single [`ValidationError`]
//! so a broken operation source reports every issue at once instead of
//! failing on the first one.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Structural rule that an operation dependency broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyRule {
    /// A `start` action was required from another service
    CrossServiceStart,
    /// An `install` action depends on something other than an `install`
    InstallOnlyOnInstall,
    /// A lifecycle action is missing the edge to the previous one
    LifecycleOrder,
    /// An operation depends on itself
    SelfDependency,
}

impl fmt::Display for DependencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrossServiceStart => {
                write!(f, "start actions may only be required from their own service")
            }
            Self::InstallOnlyOnInstall => {
                write!(f, "install actions may only depend on install actions")
            }
            Self::LifecycleOrder => {
                write!(f, "lifecycle actions must depend on the previous action")
            }
            Self::SelfDependency => write!(f, "an operation cannot depend on itself"),
        }
    }
}

/// A single problem found while validating operation definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    /// The dependency relation contains a cycle
    #[error("cycle detected: {}", .cycle.join(" -> "))]
    Cycle {
        /// Operations on the cycle, first element repeated at the end
        cycle: Vec<String>,
    },

    /// A service lacks one of the four lifecycle actions
    #[error("service '{service}' is missing its '{action}' action")]
    MissingLifecycleAction { service: String, action: String },

    /// A dependency breaks a structural rule
    #[error("'{operation}' must not depend on '{dependency}': {rule}")]
    IllegalDependency {
        operation: String,
        dependency: String,
        rule: DependencyRule,
    },

    /// A dependency names an operation that does not exist
    #[error("dependency '{dependency}' of '{operation}' does not exist")]
    UnknownDependency {
        operation: String,
        dependency: String,
    },

    /// The same operation name was declared twice
    #[error("'{name}' is declared twice, first in {first}, then in {second}")]
    DuplicateOperation {
        name: String,
        first: String,
        second: String,
    },

    /// A record could not be turned into an operation
    #[error("invalid record #{index} in {source_name}: {reason}")]
    MalformedRecord {
        source_name: String,
        index: usize,
        reason: String,
    },
}

/// Every issue found while building a registry or a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub(crate) fn new(issues: Vec<ValidationIssue>) -> Self {
        debug_assert!(!issues.is_empty());
        Self { issues }
    }

    /// The individual issues, in discovery order
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// The first cycle reported, if any
    pub fn cycle(&self) -> Option<&[String]> {
        self.issues.iter().find_map(|issue| match issue {
            ValidationIssue::Cycle { cycle } => Some(cycle.as_slice()),
            _ => None,
        })
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.issues.len();
        write!(
            f,
            "{count} validation {}",
            if count == 1 { "issue" } else { "issues" }
        )?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by the operation graph crate
#[derive(Debug, Error)]
pub enum Error {
    /// Operation definitions are invalid
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A query named an operation the graph does not contain
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },

    /// A filter expression could not be compiled
    #[error("invalid filter expression '{expression}': {source}")]
    InvalidFilter {
        expression: String,
        #[source]
        source: regex::Error,
    },

    /// An operation source is not valid YAML
    #[error("failed to parse {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// IO error while reading an operation source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_issue() {
        let err = ValidationError::new(vec![
            ValidationIssue::MissingLifecycleAction {
                service: "hdfs".into(),
                action: "init".into(),
            },
            ValidationIssue::UnknownDependency {
                operation: "yarn_config".into(),
                dependency: "hdfs_cfg".into(),
            },
        ]);

        let text = err.to_string();
        assert!(text.starts_with("2 validation issues"));
        assert!(text.contains("service 'hdfs' is missing its 'init' action"));
        assert!(text.contains("dependency 'hdfs_cfg' of 'yarn_config' does not exist"));
        assert!(err.cycle().is_none());
    }

    #[test]
    fn test_cycle_display() {
        let issue = ValidationIssue::Cycle {
            cycle: vec!["a_x".into(), "b_x".into(), "a_x".into()],
        };
        assert_eq!(issue.to_string(), "cycle detected: a_x -> b_x -> a_x");
    }
}
