//! Execution engine - runs a plan one operation at a time
//!
//! The record is written to the store before the executor is called and again
//! once the outcome is terminal, so the stored outcome list always matches the
//! work actually done.

use crate::context::{ExecutionContext, ExecutionError, Executor, ProgressCallback};
use crate::error::{Error, Result};
use crate::planner::DeploymentPlan;
use crate::store::DeploymentStore;
use crate::types::{
    DeploymentId, DeploymentRecord, DeploymentState, OperationOutcome, OperationState, RunOptions,
};
use chrono::Utc;
use confstore::VersionedConfig;
use opgraph::OperationKey;
use std::collections::BTreeMap;

/// Runs deployment plans through an executor, recording every outcome
pub struct Engine<'a> {
    store: &'a dyn DeploymentStore,
    versions: Option<&'a dyn VersionedConfig>,
}

impl<'a> Engine<'a> {
    pub fn new(store: &'a dyn DeploymentStore) -> Self {
        Self {
            store,
            versions: None,
        }
    }

    /// Record the configuration version of each service as its operations succeed
    pub fn with_versions(mut self, versions: &'a dyn VersionedConfig) -> Self {
        self.versions = Some(versions);
        self
    }

    /// Run a plan
    ///
    /// Executor failures never abort the run: they are recorded on the
    /// outcome and the returned record is always terminal (or `Pending` for a
    /// dry run). Errors are only returned for store failures and invalid
    /// resume requests.
    pub fn run<E, P>(
        &self,
        plan: &DeploymentPlan,
        executor: &E,
        options: &RunOptions,
        progress: &mut P,
    ) -> Result<DeploymentRecord>
    where
        E: Executor + ?Sized,
        P: ProgressCallback,
    {
        let mut record = DeploymentRecord::new(
            plan.kind.clone(),
            plan.scope.clone(),
            plan.filter.clone(),
            plan.keys(),
        );

        if options.dry_run {
            record.outcomes = plan
                .operations
                .iter()
                .map(|op| OperationOutcome::pending(op.key().clone(), op.is_noop()))
                .collect();
            log::info!("Dry run of {} operations ({})", plan.len(), plan.scope);
            return Ok(record);
        }

        let mut carried: BTreeMap<String, OperationOutcome> = BTreeMap::new();
        if let Some(id) = options.resume_from {
            let prior = self.resumable(id, &record)?;
            record.service_versions = prior.service_versions.clone();
            for outcome in prior.outcomes {
                if outcome.state == OperationState::Success {
                    carried.insert(outcome.operation.name().to_string(), outcome);
                }
            }
            log::info!(
                "Resuming deployment #{id}: {} of {} operations already done",
                carried.len(),
                plan.len()
            );
        }

        self.store.create(&mut record)?;
        log::info!(
            "Deployment #{} started: {} operations ({})",
            record.id,
            plan.len(),
            plan.scope
        );
        progress.on_run_start(&record);

        let mut stopped = false;
        let mut cancelled = false;

        for (index, op) in plan.operations.iter().enumerate() {
            let key = op.key();

            if let Some(prior) = carried.remove(key.name()) {
                let outcome = OperationOutcome {
                    carried_over: true,
                    ..prior
                };
                log::debug!("Deployment #{}: {} already done", record.id, key);
                record.outcomes.push(outcome);
                self.store.update(&record)?;
                progress.on_operation_complete(index, outcome_at(&record, index));
                continue;
            }

            if !stopped && options.cancel.is_cancelled() {
                log::warn!("Deployment #{} cancelled before {}", record.id, key);
                stopped = true;
                cancelled = true;
            }
            if stopped {
                let mut held = OperationOutcome::pending(key.clone(), op.is_noop());
                held.state = OperationState::Held;
                record.outcomes.push(held);
                progress.on_operation_complete(index, outcome_at(&record, index));
                continue;
            }

            progress.on_operation_start(index, key);
            if record.state == DeploymentState::Pending {
                record.started_at = Some(Utc::now());
                record.transition(DeploymentState::Running)?;
            }

            let mut outcome = OperationOutcome::pending(key.clone(), op.is_noop());
            outcome.started_at = Some(Utc::now());

            if op.is_noop() {
                outcome.state = OperationState::Success;
                outcome.ended_at = outcome.started_at;
                record.outcomes.push(outcome);
            } else {
                outcome.state = OperationState::Running;
                record.outcomes.push(outcome);
                self.store.update(&record)?;

                let ctx = ExecutionContext {
                    deployment_id: record.id,
                    operation: key,
                    cancel: &options.cancel,
                };
                let result = match executor.execute(&ctx) {
                    _ if options.cancel.is_cancelled() => Err(ExecutionError::Cancelled),
                    other => other,
                };

                let slot = &mut record.outcomes[index];
                slot.ended_at = Some(Utc::now());
                match result {
                    Ok(payload) => {
                        slot.state = OperationState::Success;
                        slot.payload = payload;
                    }
                    Err(error) => {
                        log::warn!("Deployment #{}: {} failed: {}", record.id, key, error);
                        slot.state = OperationState::Failure;
                        if error == ExecutionError::Cancelled {
                            cancelled = true;
                            stopped = true;
                        } else if options.stop_on_failure {
                            stopped = true;
                        }
                        slot.error = Some(error);
                    }
                }
            }

            if record.outcomes[index].state == OperationState::Success {
                self.record_version(&mut record, key);
            }
            self.store.update(&record)?;
            progress.on_operation_complete(index, outcome_at(&record, index));
        }

        let summary = record.summary();
        let final_state = if summary.failure == 0 && summary.held == 0 {
            DeploymentState::Success
        } else if cancelled || options.stop_on_failure || summary.success == 0 {
            DeploymentState::Failure
        } else {
            DeploymentState::PartialFailure
        };
        record.transition(final_state)?;
        record.ended_at = Some(Utc::now());
        self.store.update(&record)?;

        log::info!(
            "Deployment #{} finished: {} ({} ok, {} failed, {} held)",
            record.id,
            record.state,
            summary.success,
            summary.failure,
            summary.held
        );
        progress.on_run_complete(&record);
        Ok(record)
    }

    /// Load the deployment being resumed and check it matches the new record
    fn resumable(&self, id: DeploymentId, record: &DeploymentRecord) -> Result<DeploymentRecord> {
        let prior = self
            .store
            .get(id)?
            .ok_or(Error::DeploymentNotFound { id })?;
        if prior.state == DeploymentState::Success {
            return Err(Error::NothingToResume { id });
        }
        if prior.scope != record.scope || prior.operations != record.operations {
            return Err(Error::ResumeScopeMismatch { id });
        }
        Ok(prior)
    }

    fn record_version(&self, record: &mut DeploymentRecord, key: &OperationKey) {
        let Some(versions) = self.versions else {
            return;
        };
        let service = key.service();
        match versions.current_version(service) {
            Ok(version) => {
                record.service_versions.insert(service.to_string(), version);
            }
            Err(confstore::Error::UnknownService { .. }) => {
                log::debug!("Service {service} has no configuration history");
            }
            Err(e) => {
                log::warn!("Could not read configuration version of {service}: {e}");
            }
        }
    }
}

fn outcome_at(record: &DeploymentRecord, index: usize) -> &OperationOutcome {
    &record.outcomes[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CancelToken, NoProgress};
    use crate::planner::PlanRequest;
    use crate::store::MemoryDeploymentStore;
    use confstore::VersionId;
    use opgraph::{DependencyGraph, Registry, RulePolicy};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    const OPERATIONS: &str = r"
- name: a_install
- name: a_config
  depends_on: [a_install]
- name: a_start
  depends_on: [a_config]
  noop: true
- name: b_install
  depends_on: [a_start]
";

    fn plan() -> DeploymentPlan {
        let registry = Registry::from_yaml_str("test", OPERATIONS).unwrap();
        let graph = DependencyGraph::build_with(&registry, RulePolicy::lenient()).unwrap();
        DeploymentPlan::from_dag(&graph, &PlanRequest::default()).unwrap()
    }

    #[derive(Default)]
    struct Scripted {
        failing: BTreeSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl Executor for Scripted {
        fn execute(&self, ctx: &ExecutionContext<'_>) -> std::result::Result<String, ExecutionError> {
            let name = ctx.operation.name().to_string();
            self.calls.lock().unwrap().push(name.clone());
            if self.failing.contains(&name) {
                Err(ExecutionError::failed(format!("{name} broke")))
            } else {
                Ok(format!("{name} done"))
            }
        }
    }

    fn states(record: &DeploymentRecord) -> Vec<OperationState> {
        record.outcomes.iter().map(|o| o.state).collect()
    }

    #[test]
    fn test_noop_skips_executor() {
        let store = MemoryDeploymentStore::new();
        let executor = Scripted::default();
        let record = Engine::new(&store)
            .run(&plan(), &executor, &RunOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(record.state, DeploymentState::Success);
        assert_eq!(
            *executor.calls.lock().unwrap(),
            vec!["a_install", "a_config", "b_install"]
        );
        let noop = record.outcome("a_start").unwrap();
        assert!(noop.noop);
        assert!(noop.payload.is_empty());
        assert_eq!(record.summary().noop, 1);
        assert_eq!(record.summary().executed(), 3);
        assert_eq!(store.get(record.id).unwrap().unwrap(), record);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let store = MemoryDeploymentStore::new();
        let executor = Scripted::default();
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let record = Engine::new(&store)
            .run(&plan(), &executor, &options, &mut NoProgress)
            .unwrap();

        assert_eq!(record.state, DeploymentState::Pending);
        assert_eq!(record.id, 0);
        assert!(record.outcomes.iter().all(|o| o.state == OperationState::Pending));
        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(store.last().unwrap().is_none());
    }

    #[test]
    fn test_outcomes_persisted_before_next_operation() {
        struct Inspecting<'s> {
            store: &'s MemoryDeploymentStore,
            seen: Mutex<Vec<Vec<OperationState>>>,
        }

        impl Executor for Inspecting<'_> {
            fn execute(
                &self,
                ctx: &ExecutionContext<'_>,
            ) -> std::result::Result<String, ExecutionError> {
                let stored = self.store.get(ctx.deployment_id).unwrap().unwrap();
                assert_eq!(stored.state, DeploymentState::Running);
                self.seen.lock().unwrap().push(states(&stored));
                Ok(String::new())
            }
        }

        let store = MemoryDeploymentStore::new();
        let executor = Inspecting {
            store: &store,
            seen: Mutex::new(Vec::new()),
        };
        Engine::new(&store)
            .run(&plan(), &executor, &RunOptions::default(), &mut NoProgress)
            .unwrap();

        use OperationState::*;
        assert_eq!(
            *executor.seen.lock().unwrap(),
            vec![
                vec![Running],
                vec![Success, Running],
                vec![Success, Success, Success, Running],
            ]
        );
    }

    struct CancelOn {
        name: &'static str,
        token: CancelToken,
        fail: bool,
    }

    impl Executor for CancelOn {
        fn execute(&self, ctx: &ExecutionContext<'_>) -> std::result::Result<String, ExecutionError> {
            if ctx.operation.name() != self.name {
                return Ok(String::new());
            }
            self.token.cancel();
            if self.fail {
                Err(ExecutionError::failed("terminated by signal 2"))
            } else {
                Ok(String::new())
            }
        }
    }

    fn run_cancelling(fail: bool) -> DeploymentRecord {
        let store = MemoryDeploymentStore::new();
        let options = RunOptions {
            stop_on_failure: false,
            ..Default::default()
        };
        let executor = CancelOn {
            name: "a_config",
            token: options.cancel.clone(),
            fail,
        };
        Engine::new(&store)
            .run(&plan(), &executor, &options, &mut NoProgress)
            .unwrap()
    }

    #[test]
    fn test_cancel_during_operation() {
        let record = run_cancelling(false);

        use OperationState::*;
        assert_eq!(states(&record), vec![Success, Failure, Held, Held]);
        assert!(record.outcome("a_config").unwrap().is_cancelled());
        assert_eq!(record.state, DeploymentState::Failure);
    }

    #[test]
    fn test_failure_after_cancel_is_recorded_as_cancelled() {
        let record = run_cancelling(true);

        use OperationState::*;
        assert_eq!(states(&record), vec![Success, Failure, Held, Held]);
        assert!(record.outcome("a_config").unwrap().is_cancelled());
        assert_eq!(record.state, DeploymentState::Failure);
    }

    #[test]
    fn test_cancel_before_start_holds_everything() {
        let store = MemoryDeploymentStore::new();
        let options = RunOptions::default();
        options.cancel.cancel();
        let executor = Scripted::default();
        let record = Engine::new(&store)
            .run(&plan(), &executor, &options, &mut NoProgress)
            .unwrap();

        assert!(record.outcomes.iter().all(|o| o.state == OperationState::Held));
        assert_eq!(record.state, DeploymentState::Failure);
        assert!(record.started_at.is_none());
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resume_requires_matching_unfinished_record() {
        let store = MemoryDeploymentStore::new();
        let engine = Engine::new(&store);
        let done = engine
            .run(&plan(), &Scripted::default(), &RunOptions::default(), &mut NoProgress)
            .unwrap();

        let options = RunOptions {
            resume_from: Some(done.id),
            ..Default::default()
        };
        let err = engine
            .run(&plan(), &Scripted::default(), &options, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::NothingToResume { .. }));

        let options = RunOptions {
            resume_from: Some(99),
            ..Default::default()
        };
        let err = engine
            .run(&plan(), &Scripted::default(), &options, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::DeploymentNotFound { id: 99 }));
    }

    #[test]
    fn test_service_versions_recorded_on_success() {
        struct Fixed;

        impl VersionedConfig for Fixed {
            fn current_version(&self, service: &str) -> confstore::Result<VersionId> {
                match service {
                    "a" => Ok(VersionId::from("a-v2")),
                    _ => Err(confstore::Error::UnknownService {
                        service: service.to_string(),
                    }),
                }
            }

            fn diff(
                &self,
                _service: &str,
                _from: &VersionId,
                _to: &VersionId,
            ) -> confstore::Result<BTreeSet<String>> {
                Ok(BTreeSet::new())
            }
        }

        let store = MemoryDeploymentStore::new();
        let record = Engine::new(&store)
            .with_versions(&Fixed)
            .run(&plan(), &Scripted::default(), &RunOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(record.service_versions.len(), 1);
        assert_eq!(record.service_versions["a"], VersionId::from("a-v2"));
    }
}
