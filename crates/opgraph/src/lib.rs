//! # Opgraph
//!
//! Operation registry and dependency graph for cluster deployments.
//!
//! Deployments are modelled as operations named
//! `service_action` or `service_component_action` (for example
//! `hdfs_install`, `hdfs_namenode_start`), each declaring the operations it
//! depends on. This crate:
//! - parses operation definitions from YAML sources into a [`Registry`]
//! - validates them into an immutable, acyclic [`DependencyGraph`]
//! - answers ordering and reachability queries over the graph
//! - narrows operation sets with glob or regex [`OperationFilter`]s
//!
//! ## Example
//!
//! ```
//! use opgraph::{DependencyGraph, Registry, RulePolicy};
//!
//! let registry = Registry::from_yaml_str(
//!     "inline",
//!     r"
//! - name: a_install
//! - name: a_config
//!   depends_on: [a_install]
//! - name: b_install
//! - name: b_config
//!   depends_on: [a_config, b_install]
//! ",
//! )?;
//! let graph = DependencyGraph::build_with(&registry, RulePolicy::lenient())?;
//!
//! let order: Vec<&str> = graph.topological_order().iter().map(|op| op.name()).collect();
//! assert_eq!(order, ["a_install", "b_install", "a_config", "b_config"]);
//! # Ok::<(), opgraph::Error>(())
//! ```

mod error;
mod filter;
mod graph;
mod operation;
mod registry;

pub use error::{DependencyRule, Error, Result, ValidationError, ValidationIssue};
pub use filter::{FilterKind, FilterSpec, OperationFilter, glob_to_regex};
pub use graph::{DependencyGraph, RuleLevel, RulePolicy};
pub use operation::{LIFECYCLE_ACTIONS, OPERATION_NAME_MAX_LENGTH, Operation, OperationKey};
pub use registry::{OperationSpec, Registry};
