//! Error types for the confstore crate

use thiserror::Error;

/// Errors that can occur while reading or extending version histories
#[derive(Error, Debug)]
pub enum Error {
    /// The service has no history
    #[error("unknown service: {service}")]
    UnknownService { service: String },

    /// A version id is not part of the service's history
    #[error("unknown version {version} for service {service}")]
    UnknownVersion { service: String, version: String },

    /// A version prefix matches more than one version
    #[error("version prefix '{prefix}' is ambiguous for service {service}")]
    AmbiguousVersion { service: String, prefix: String },

    /// A commit would not change anything
    #[error("no changes to commit for service {service}")]
    NoChanges { service: String },

    /// An append did not extend the current head
    #[error(
        "history of {service} moved: expected parent {}, found {}",
        .expected.as_deref().unwrap_or("<none>"),
        .found.as_deref().unwrap_or("<none>")
    )]
    NonLinearHistory {
        service: String,
        expected: Option<String>,
        found: Option<String>,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for confstore operations
pub type Result<T> = std::result::Result<T, Error>;
