//! # Deployment
//!
//! Plan, run and record ordered cluster deployments.
//!
//! ## Core Concepts
//!
//! - **DeploymentPlan**: operations selected from a [`opgraph::DependencyGraph`], in
//!   topological order
//! - **ImpactResolver**: turns configuration changes into the operations that must re-run
//! - **Engine**: runs a plan one operation at a time through an [`Executor`], persisting
//!   each outcome before moving on
//! - **DeploymentRecord**: the durable audit trail of a run, kept by a [`DeploymentStore`]
//!
//! ## Example
//!
//! ```
//! use deployment::{
//!     DeploymentPlan, DeploymentState, Engine, ExecutionContext, ExecutionError,
//!     MemoryDeploymentStore, NoProgress, PlanRequest, RunOptions,
//! };
//! use opgraph::{DependencyGraph, Registry, RulePolicy};
//!
//! let registry = Registry::from_yaml_str(
//!     "ops.yml",
//!     "- name: a_install\n- name: a_config\n  depends_on: [a_install]\n",
//! )?;
//! let graph = DependencyGraph::build_with(&registry, RulePolicy::lenient())?;
//! let plan = DeploymentPlan::from_dag(&graph, &PlanRequest::default())?;
//!
//! let executor = |ctx: &ExecutionContext<'_>| -> Result<String, ExecutionError> {
//!     Ok(format!("ran {}", ctx.operation))
//! };
//! let store = MemoryDeploymentStore::new();
//! let record = Engine::new(&store).run(&plan, &executor, &RunOptions::default(), &mut NoProgress)?;
//! assert_eq!(record.state, DeploymentState::Success);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod context;
mod engine;
mod error;
mod impact;
mod planner;
mod sqlite;
mod store;
mod types;

pub use context::{
    CancelToken, ExecutionContext, ExecutionError, Executor, NoProgress, ProgressCallback,
};
pub use engine::Engine;
pub use error::{Error, Result};
pub use impact::{
    FileMapper, ImpactResolver, ImpactSet, ReconfigureRule, RuleSet, RuleViolation,
    ServiceChange, ServiceLevelMapper, pending_changes, verify_rules,
};
pub use planner::{DeploymentPlan, PlanRequest};
pub use sqlite::SqliteDeploymentStore;
pub use store::{DeploymentStore, MemoryDeploymentStore};
pub use types::{
    DeploymentId, DeploymentRecord, DeploymentScope, DeploymentState, DeploymentSummary,
    OperationOutcome, OperationState, PlanKind, RunOptions,
};
