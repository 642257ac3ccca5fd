//! Deployment planner - builds ordered operation plans
//!
//! Every plan is ordered by the graph's topological order restricted to the
//! selected operations, so a plan built twice from the same graph and the
//! same request is identical.

use crate::error::{Error, Result};
use crate::impact::ImpactSet;
use crate::types::{DeploymentRecord, DeploymentScope, DeploymentState, PlanKind};
use opgraph::{DependencyGraph, FilterSpec, Operation, OperationKey};
use std::collections::BTreeSet;

/// Selection of a graph-based deployment
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Deploy these and everything they need
    pub targets: Vec<String>,
    /// Deploy these and everything that depends on them
    pub sources: Vec<String>,
    /// Narrow the selection by name
    pub filter: Option<FilterSpec>,
}

/// An ordered list of operations to run
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub kind: PlanKind,
    pub scope: DeploymentScope,
    pub filter: Option<FilterSpec>,
    pub operations: Vec<Operation>,
}

impl DeploymentPlan {
    /// Plan from graph selection
    ///
    /// Targets select their ancestors, sources their descendants. With both,
    /// the plan is the intersection. With neither, the whole graph.
    ///
    /// The filter is applied last. When targets are given it must not remove
    /// a target or a dependency of a remaining operation.
    pub fn from_dag(graph: &DependencyGraph, request: &PlanRequest) -> Result<Self> {
        let mut selected: Vec<&Operation> = match (
            request.targets.is_empty(),
            request.sources.is_empty(),
        ) {
            (true, true) => graph.topological_order(),
            (false, true) => graph.operations_to(&request.targets)?,
            (true, false) => graph.operations_from(&request.sources)?,
            (false, false) => {
                let downstream: BTreeSet<&str> = graph
                    .operations_from(&request.sources)?
                    .into_iter()
                    .map(Operation::name)
                    .collect();
                graph
                    .operations_to(&request.targets)?
                    .into_iter()
                    .filter(|op| downstream.contains(op.name()))
                    .collect()
            }
        };

        if let Some(spec) = &request.filter {
            let filter = spec.compile()?;
            selected = filter.apply(selected);
            if !request.targets.is_empty() {
                check_filter_closure(&selected, &request.targets, spec)?;
            }
        }

        if selected.is_empty() {
            return Err(Error::EmptyPlan);
        }

        let scope = if request.targets.is_empty() && request.sources.is_empty() {
            DeploymentScope::All
        } else {
            DeploymentScope::Dag {
                targets: sorted(&request.targets),
                sources: sorted(&request.sources),
            }
        };

        Ok(Self {
            kind: PlanKind::Dag,
            scope,
            filter: request.filter.clone(),
            operations: selected.into_iter().cloned().collect(),
        })
    }

    /// Plan running exactly the named operations, in graph order
    pub fn from_operations<S: AsRef<str>>(graph: &DependencyGraph, names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::EmptyPlan);
        }
        let operations: Vec<Operation> = graph
            .topological_order_of(names)?
            .into_iter()
            .cloned()
            .collect();

        Ok(Self {
            kind: PlanKind::Operations,
            scope: DeploymentScope::Operations {
                names: operations.iter().map(|op| op.name().to_string()).collect(),
            },
            filter: None,
            operations,
        })
    }

    /// Plan re-running the executable part of an impact set
    pub fn from_impact(graph: &DependencyGraph, impact: &ImpactSet) -> Result<Self> {
        if impact.executable.is_empty() {
            return Err(Error::EmptyPlan);
        }
        let operations: Vec<Operation> = graph
            .topological_order_of(impact.executable.iter().map(OperationKey::name))?
            .into_iter()
            .cloned()
            .collect();

        Ok(Self {
            kind: PlanKind::Reconfigure,
            scope: DeploymentScope::Reconfigure {
                services: impact.services.iter().cloned().collect(),
            },
            filter: None,
            operations,
        })
    }

    /// Rebuild the plan of an unfinished deployment
    ///
    /// Run it with `RunOptions::resume_from` set to the record's id so
    /// earlier successes are carried over.
    pub fn resume(graph: &DependencyGraph, record: &DeploymentRecord) -> Result<Self> {
        if record.state == DeploymentState::Success {
            return Err(Error::NothingToResume { id: record.id });
        }
        let operations = record
            .operations
            .iter()
            .map(|key| {
                graph
                    .get(key.name())
                    .cloned()
                    .ok_or_else(|| Error::UnknownOperation {
                        name: key.name().to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            kind: PlanKind::Resume { from: record.id },
            scope: record.scope.clone(),
            filter: record.filter.clone(),
            operations,
        })
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operation keys, in execution order
    pub fn keys(&self) -> Vec<OperationKey> {
        self.operations.iter().map(|op| op.key().clone()).collect()
    }

    /// Numbered plan lines for display
    pub fn preview(&self) -> Vec<String> {
        let width = self.operations.len().to_string().len();
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let marker = if op.is_noop() { " (noop)" } else { "" };
                format!("{:>width$}. {}{}", i + 1, op.name(), marker)
            })
            .collect()
    }
}

fn sorted(names: &[String]) -> Vec<String> {
    let mut names = names.to_vec();
    names.sort();
    names.dedup();
    names
}

/// Every target must survive the filter, and so must every dependency of a
/// surviving operation
fn check_filter_closure(selected: &[&Operation], targets: &[String], filter: &FilterSpec) -> Result<()> {
    let kept: BTreeSet<&str> = selected.iter().map(|op| op.name()).collect();

    for target in targets {
        if !kept.contains(target.as_str()) {
            return Err(Error::FilterExcludesTarget {
                target: target.clone(),
                filter: filter.to_string(),
            });
        }
    }
    for op in selected {
        if let Some(dep) = op.depends_on().iter().find(|dep| !kept.contains(dep.name())) {
            return Err(Error::FilterExcludesDependency {
                operation: op.name().to_string(),
                dependency: dep.name().to_string(),
                filter: filter.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opgraph::{Registry, RulePolicy};

    const SCENARIO: &str = r"
- name: a_install
- name: a_config
  depends_on: [a_install]
- name: b_install
- name: b_config
  depends_on: [a_config, b_install]
- name: b_init
  depends_on: [b_config]
  noop: true
";

    fn graph() -> DependencyGraph {
        let registry = Registry::from_yaml_str("test", SCENARIO).unwrap();
        DependencyGraph::build_with(&registry, RulePolicy::lenient()).unwrap()
    }

    fn names(plan: &DeploymentPlan) -> Vec<&str> {
        plan.operations.iter().map(Operation::name).collect()
    }

    #[test]
    fn test_whole_graph_plan() {
        let plan = DeploymentPlan::from_dag(&graph(), &PlanRequest::default()).unwrap();
        assert_eq!(plan.scope, DeploymentScope::All);
        assert_eq!(
            names(&plan),
            vec!["a_install", "b_install", "a_config", "b_config", "b_init"]
        );
    }

    #[test]
    fn test_targets_and_sources() {
        let graph = graph();
        let request = PlanRequest {
            targets: vec!["a_config".into()],
            ..Default::default()
        };
        let plan = DeploymentPlan::from_dag(&graph, &request).unwrap();
        assert_eq!(names(&plan), vec!["a_install", "a_config"]);

        let request = PlanRequest {
            sources: vec!["a_config".into()],
            ..Default::default()
        };
        let plan = DeploymentPlan::from_dag(&graph, &request).unwrap();
        assert_eq!(names(&plan), vec!["a_config", "b_config", "b_init"]);

        let request = PlanRequest {
            targets: vec!["b_config".into()],
            sources: vec!["b_install".into()],
            filter: None,
        };
        let plan = DeploymentPlan::from_dag(&graph, &request).unwrap();
        assert_eq!(names(&plan), vec!["b_install", "b_config"]);
    }

    #[test]
    fn test_filter_is_intersection_without_targets() {
        let request = PlanRequest {
            filter: Some(FilterSpec::glob("*_config")),
            ..Default::default()
        };
        let plan = DeploymentPlan::from_dag(&graph(), &request).unwrap();
        assert_eq!(names(&plan), vec!["a_config", "b_config"]);
        assert_eq!(plan.filter, Some(FilterSpec::glob("*_config")));
    }

    #[test]
    fn test_filter_conflicting_with_targets() {
        let graph = graph();
        let request = PlanRequest {
            targets: vec!["b_config".into()],
            filter: Some(FilterSpec::regex("b_")),
            ..Default::default()
        };
        let err = DeploymentPlan::from_dag(&graph, &request).unwrap_err();
        assert!(matches!(
            err,
            Error::FilterExcludesDependency { ref operation, ref dependency, .. }
                if operation == "b_config" && dependency == "a_config"
        ));

        let request = PlanRequest {
            targets: vec!["b_config".into()],
            filter: Some(FilterSpec::glob("a_*")),
            ..Default::default()
        };
        let err = DeploymentPlan::from_dag(&graph, &request).unwrap_err();
        assert!(matches!(err, Error::FilterExcludesTarget { .. }));
    }

    #[test]
    fn test_empty_plan() {
        let request = PlanRequest {
            filter: Some(FilterSpec::glob("zookeeper_*")),
            ..Default::default()
        };
        let err = DeploymentPlan::from_dag(&graph(), &request).unwrap_err();
        assert!(matches!(err, Error::EmptyPlan));

        let none: &[&str] = &[];
        assert!(matches!(
            DeploymentPlan::from_operations(&graph(), none),
            Err(Error::EmptyPlan)
        ));
    }

    #[test]
    fn test_from_operations_uses_graph_order() {
        let plan = DeploymentPlan::from_operations(&graph(), &["b_config", "a_install"]).unwrap();
        assert_eq!(names(&plan), vec!["a_install", "b_config"]);
        assert!(matches!(
            DeploymentPlan::from_operations(&graph(), &["nope_config"]),
            Err(Error::Graph(_))
        ));
    }

    const THROUGH_NOOP: &str = r"
- name: zk_config
- name: zk_start
  depends_on: [zk_config]
  noop: true
- name: app_config
  depends_on: [zk_start]
";

    #[test]
    fn test_order_follows_paths_through_noops() {
        let registry = Registry::from_yaml_str("test", THROUGH_NOOP).unwrap();
        let graph = DependencyGraph::build_with(&registry, RulePolicy::lenient()).unwrap();

        let plan = DeploymentPlan::from_operations(&graph, &["app_config", "zk_config"]).unwrap();
        assert_eq!(names(&plan), vec!["zk_config", "app_config"]);

        let key = |name: &str| OperationKey::parse(name).unwrap();
        let impact = ImpactSet {
            services: ["zk".to_string()].into(),
            reachable: [key("zk_config"), key("zk_start"), key("app_config")].into(),
            executable: [key("zk_config"), key("app_config")].into(),
            ..Default::default()
        };
        let plan = DeploymentPlan::from_impact(&graph, &impact).unwrap();
        assert_eq!(names(&plan), vec!["zk_config", "app_config"]);
    }

    #[test]
    fn test_resume_rebuilds_recorded_order() {
        let graph = graph();
        let plan = DeploymentPlan::from_dag(&graph, &PlanRequest::default()).unwrap();
        let mut record = DeploymentRecord::new(
            plan.kind.clone(),
            plan.scope.clone(),
            None,
            plan.keys(),
        );
        record.id = 7;
        record.state = DeploymentState::Failure;

        let resumed = DeploymentPlan::resume(&graph, &record).unwrap();
        assert_eq!(resumed.kind, PlanKind::Resume { from: 7 });
        assert_eq!(resumed.keys(), record.operations);

        record.state = DeploymentState::Success;
        assert!(matches!(
            DeploymentPlan::resume(&graph, &record),
            Err(Error::NothingToResume { id: 7 })
        ));
    }

    #[test]
    fn test_preview_marks_noops() {
        let plan = DeploymentPlan::from_dag(&graph(), &PlanRequest::default()).unwrap();
        let lines = plan.preview();
        assert_eq!(lines[0], "1. a_install");
        assert_eq!(lines[4], "5. b_init (noop)");
    }
}
