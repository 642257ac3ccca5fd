//! Execution context and provider traits
//!
//! These traits keep the engine independent of how operations are actually
//! performed and how progress is shown.

use crate::types::{DeploymentId, DeploymentRecord, OperationOutcome};
use opgraph::OperationKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Failure reported by an executor
///
/// The engine records it on the operation outcome; it never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// The operation ran and failed
    #[error("{message}")]
    Failed { message: String },

    /// The run was cancelled while the operation was in flight
    #[error("cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Shared flag for cancelling an in-flight run
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context passed to the executor for one operation
pub struct ExecutionContext<'a> {
    /// Deployment the operation belongs to
    pub deployment_id: DeploymentId,
    /// Operation to perform
    pub operation: &'a OperationKey,
    /// Cancellation of the whole run
    pub cancel: &'a CancelToken,
}

impl ExecutionContext<'_> {
    /// Return `Err(Cancelled)` if the run was cancelled
    pub fn check_cancelled(&self) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Performs the effect of an operation
///
/// Implement this trait to run playbooks, scripts or anything else. A call
/// may block for as long as the operation takes; long-running executors
/// should watch [`ExecutionContext::cancel`].
pub trait Executor: Send + Sync {
    /// Perform one operation, returning its output
    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<String, ExecutionError>;
}

impl<F> Executor for F
where
    F: Fn(&ExecutionContext<'_>) -> Result<String, ExecutionError> + Send + Sync,
{
    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<String, ExecutionError> {
        self(ctx)
    }
}

/// Progress callback for deployment runs
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback: Send {
    /// Called once the record exists, before the first operation
    fn on_run_start(&mut self, record: &DeploymentRecord);

    /// Called before the executor is invoked for an operation
    fn on_operation_start(&mut self, index: usize, operation: &OperationKey);

    /// Called after an operation outcome becomes terminal
    fn on_operation_complete(&mut self, index: usize, outcome: &OperationOutcome);

    /// Called when the record reached its final state
    fn on_run_complete(&mut self, record: &DeploymentRecord);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _record: &DeploymentRecord) {}
    fn on_operation_start(&mut self, _index: usize, _operation: &OperationKey) {}
    fn on_operation_complete(&mut self, _index: usize, _outcome: &OperationOutcome) {}
    fn on_run_complete(&mut self, _record: &DeploymentRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_fn<F>(f: F) -> F
    where
        F: Fn(&ExecutionContext<'_>) -> Result<String, ExecutionError> + Send + Sync,
    {
        f
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_closure_executor() {
        let key = OperationKey::parse("hdfs_config").unwrap();
        let cancel = CancelToken::new();
        let ctx = ExecutionContext {
            deployment_id: 1,
            operation: &key,
            cancel: &cancel,
        };

        let executor = executor_fn(|ctx| {
            ctx.check_cancelled()?;
            Ok(format!("ran {}", ctx.operation))
        });
        assert_eq!(executor.execute(&ctx).unwrap(), "ran hdfs_config");

        cancel.cancel();
        assert_eq!(executor.execute(&ctx), Err(ExecutionError::Cancelled));
    }

    #[test]
    fn test_execution_error_serializes_with_kind() {
        let json = serde_json::to_string(&ExecutionError::failed("exit 2")).unwrap();
        assert_eq!(json, r#"{"kind":"failed","message":"exit 2"}"#);
    }
}
