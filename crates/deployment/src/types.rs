//! Core types for deployment records

use crate::context::{CancelToken, ExecutionError};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use confstore::VersionId;
use opgraph::{FilterSpec, OperationKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned by a deployment store, `0` until persisted
pub type DeploymentId = u64;

/// Overall state of a deployment
///
/// `Pending → Running → {Success | Failure | PartialFailure}`. A record that
/// never started an operation may also end directly in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Running,
    Success,
    Failure,
    PartialFailure,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::PartialFailure)
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::PartialFailure => "partial_failure",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "partial_failure" => Ok(Self::PartialFailure),
            other => Err(format!("unknown deployment state: {other}")),
        }
    }
}

/// State of one operation within a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Running,
    Success,
    Failure,
    /// Not attempted because the run stopped earlier
    Held,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Held)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Held => "held",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "held" => Ok(Self::Held),
            other => Err(format!("unknown operation state: {other}")),
        }
    }
}

/// Result of one operation in a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub operation: OperationKey,
    pub state: OperationState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Opaque executor output, empty for no-ops
    pub payload: String,
    pub error: Option<ExecutionError>,
    pub noop: bool,
    /// Success taken over from the deployment being resumed
    pub carried_over: bool,
}

impl OperationOutcome {
    pub fn pending(operation: OperationKey, noop: bool) -> Self {
        Self {
            operation,
            state: OperationState::Pending,
            started_at: None,
            ended_at: None,
            payload: String::new(),
            error: None,
            noop,
            carried_over: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(ExecutionError::Cancelled))
    }
}

/// What a deployment was asked to cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentScope {
    /// The whole graph
    All,
    /// Ancestors of `targets` and/or descendants of `sources`
    Dag {
        targets: Vec<String>,
        sources: Vec<String>,
    },
    /// An explicit operation list
    Operations { names: Vec<String> },
    /// Operations impacted by configuration changes of `services`
    Reconfigure { services: Vec<String> },
}

impl fmt::Display for DeploymentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Dag { targets, sources } => {
                let mut parts = Vec::new();
                if !targets.is_empty() {
                    parts.push(format!("targets: {}", targets.join(", ")));
                }
                if !sources.is_empty() {
                    parts.push(format!("sources: {}", sources.join(", ")));
                }
                write!(f, "dag ({})", parts.join("; "))
            }
            Self::Operations { names } => write!(f, "operations ({})", names.join(", ")),
            Self::Reconfigure { services } => {
                write!(f, "reconfigure ({})", services.join(", "))
            }
        }
    }
}

/// How a deployment plan was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanKind {
    Dag,
    Operations,
    Resume { from: DeploymentId },
    Reconfigure,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dag => write!(f, "dag"),
            Self::Operations => write!(f, "operations"),
            Self::Resume { from } => write!(f, "resume of #{from}"),
            Self::Reconfigure => write!(f, "reconfigure"),
        }
    }
}

/// Durable audit trail of one deployment run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub kind: PlanKind,
    pub scope: DeploymentScope,
    pub filter: Option<FilterSpec>,
    /// Planned operations, in execution order
    pub operations: Vec<OperationKey>,
    pub state: DeploymentState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Outcomes in the order operations were attempted
    pub outcomes: Vec<OperationOutcome>,
    /// Configuration version deployed, per service touched
    pub service_versions: BTreeMap<String, VersionId>,
}

impl DeploymentRecord {
    pub fn new(
        kind: PlanKind,
        scope: DeploymentScope,
        filter: Option<FilterSpec>,
        operations: Vec<OperationKey>,
    ) -> Self {
        Self {
            id: 0,
            kind,
            scope,
            filter,
            operations,
            state: DeploymentState::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            outcomes: Vec::new(),
            service_versions: BTreeMap::new(),
        }
    }

    /// Move to another state, refusing to leave a terminal one
    pub fn transition(&mut self, next: DeploymentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::debug!("Deployment #{}: {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Outcome recorded for an operation, if attempted
    pub fn outcome(&self, name: &str) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| o.operation.name() == name)
    }

    /// Operations that would still run if the deployment were resumed
    pub fn remaining(&self) -> Vec<&OperationKey> {
        self.operations
            .iter()
            .filter(|key| {
                self.outcome(key.name())
                    .is_none_or(|o| o.state != OperationState::Success)
            })
            .collect()
    }

    /// Services with at least one outcome
    pub fn services(&self) -> BTreeSet<&str> {
        self.outcomes.iter().map(|o| o.operation.service()).collect()
    }

    pub fn summary(&self) -> DeploymentSummary {
        let mut summary = DeploymentSummary::default();
        for outcome in &self.outcomes {
            summary.add_outcome(outcome);
        }
        summary
    }
}

/// Counts of outcomes in a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub success: usize,
    pub failure: usize,
    pub held: usize,
    pub pending: usize,
    pub noop: usize,
    pub carried_over: usize,
}

impl DeploymentSummary {
    /// Operations the executor actually ran successfully
    pub fn executed(&self) -> usize {
        self.success.saturating_sub(self.noop + self.carried_over)
    }

    pub fn is_success(&self) -> bool {
        self.failure == 0 && self.held == 0 && self.pending == 0
    }

    pub fn total(&self) -> usize {
        self.success + self.failure + self.held + self.pending
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &OperationOutcome) {
        match outcome.state {
            OperationState::Success => self.success += 1,
            OperationState::Failure => self.failure += 1,
            OperationState::Held => self.held += 1,
            OperationState::Pending | OperationState::Running => self.pending += 1,
        }
        if outcome.carried_over {
            self.carried_over += 1;
        } else if outcome.noop && outcome.state == OperationState::Success {
            self.noop += 1;
        }
    }
}

/// Options for a deployment run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Report the plan without invoking the executor or the store
    pub dry_run: bool,
    /// Hold remaining operations after the first failure
    pub stop_on_failure: bool,
    /// Skip operations that succeeded in this earlier deployment
    pub resume_from: Option<DeploymentId>,
    /// External cancellation of the run
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            stop_on_failure: true,
            resume_from: None,
            cancel: CancelToken::new(),
        }
    }
}
