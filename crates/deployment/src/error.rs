//! Error types for the deployment crate

use crate::types::{DeploymentId, DeploymentState};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while planning, running or persisting deployments
///
/// Failures of individual operations are not errors: they end up in the
/// deployment record as outcomes.
#[derive(Error, Debug)]
pub enum Error {
    /// Selection and filter left nothing to run
    #[error("the requested selection contains no operations")]
    EmptyPlan,

    /// The filter removed an explicitly requested target
    #[error("filter {filter} excludes requested target {target}")]
    FilterExcludesTarget { target: String, filter: String },

    /// The filter removed a hard dependency of a selected operation
    #[error("filter {filter} excludes {dependency}, required by {operation}")]
    FilterExcludesDependency {
        operation: String,
        dependency: String,
        filter: String,
    },

    /// A recorded operation no longer exists in the graph
    #[error("operation {name} is not part of the current graph")]
    UnknownOperation { name: String },

    /// No deployment with this id
    #[error("deployment {id} not found")]
    DeploymentNotFound { id: DeploymentId },

    /// The deployment already completed successfully
    #[error("deployment {id} succeeded, nothing to resume")]
    NothingToResume { id: DeploymentId },

    /// The resumed deployment targeted something else
    #[error("deployment {id} does not match the plan being resumed")]
    ResumeScopeMismatch { id: DeploymentId },

    /// A stored deployment cannot be read back faithfully
    #[error("deployment {id} is corrupt: {reason}")]
    CorruptRecord { id: DeploymentId, reason: String },

    /// Illegal deployment state change
    #[error("invalid deployment transition from {from} to {to}")]
    InvalidTransition {
        from: DeploymentState,
        to: DeploymentState,
    },

    /// Operation graph error
    #[error(transparent)]
    Graph(#[from] opgraph::Error),

    /// Configuration store error
    #[error(transparent)]
    Config(#[from] confstore::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A rules file is not valid YAML
    #[error("failed to parse {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, Error>;
