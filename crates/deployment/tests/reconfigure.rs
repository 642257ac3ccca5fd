use confstore::{ChangeSet, ConfigStore, MemoryBackend, SqliteBackend};
use deployment::{
    DeploymentPlan, DeploymentState, DeploymentStore, Engine, ExecutionContext, ExecutionError,
    ImpactResolver, MemoryDeploymentStore, NoProgress, PlanRequest, RuleSet, RuleViolation,
    RunOptions, ServiceChange, ServiceLevelMapper, pending_changes, verify_rules,
};
use opgraph::{DependencyGraph, OperationKey, Registry, RulePolicy};

const CLUSTER: &str = r"
- name: zookeeper_install
- name: zookeeper_config
  depends_on: [zookeeper_install]
- name: zookeeper_start
  depends_on: [zookeeper_config]
- name: zookeeper_init
  depends_on: [zookeeper_start]
  noop: true

- name: hdfs_install
- name: hdfs_config
  depends_on: [hdfs_install]
- name: hdfs_start
  depends_on: [hdfs_config]
- name: hdfs_init
  depends_on: [hdfs_start]

- name: yarn_install
- name: yarn_config
  depends_on: [yarn_install, hdfs_config]
- name: yarn_start
  depends_on: [yarn_config]
- name: yarn_init
  depends_on: [yarn_start, hdfs_init]
  noop: true
";

fn cluster() -> DependencyGraph {
    let registry = Registry::from_yaml_str("cluster.yml", CLUSTER).unwrap();
    DependencyGraph::build(&registry).unwrap()
}

fn succeed(ctx: &ExecutionContext<'_>) -> Result<String, ExecutionError> {
    Ok(ctx.operation.to_string())
}

fn names(keys: &std::collections::BTreeSet<OperationKey>) -> Vec<&str> {
    keys.iter().map(OperationKey::name).collect()
}

#[test]
fn test_hdfs_change_reaches_yarn_but_not_zookeeper() {
    let graph = cluster();
    let dir = tempfile::tempdir().unwrap();
    let versions = ConfigStore::new(SqliteBackend::open(&dir.path().join("config.db")).unwrap());

    let v1 = versions
        .commit("hdfs", &ChangeSet::new("initial").write("hdfs-site.xml", "replication=3"))
        .unwrap();
    let v2 = versions
        .commit("hdfs", &ChangeSet::new("tune").write("hdfs-site.xml", "replication=2"))
        .unwrap();

    let resolver = ImpactResolver::new(&graph, &versions, &ServiceLevelMapper);
    let impact = resolver
        .resolve(&[ServiceChange {
            service: "hdfs".into(),
            from: Some(v1.id),
            to: v2.id,
        }])
        .unwrap();

    let executable = names(&impact.executable);
    assert!(executable.contains(&"yarn_config"));
    assert!(executable.contains(&"yarn_start"));
    assert!(!executable.iter().any(|n| n.starts_with("zookeeper")));
    assert!(!executable.contains(&"hdfs_install"));

    // The no-op stays reachable but is never executed
    assert!(impact.reachable.iter().any(|k| k.name() == "yarn_init"));
    assert!(!executable.contains(&"yarn_init"));

    // Closed under dependents
    for key in &impact.reachable {
        for dependent in graph.descendants_of(key.name()).unwrap() {
            assert!(impact.reachable.contains(&dependent), "{dependent} missing");
        }
    }

    let plan = DeploymentPlan::from_impact(&graph, &impact).unwrap();
    let order: Vec<&str> = plan.operations.iter().map(|op| op.name()).collect();
    assert_eq!(order.first(), Some(&"hdfs_config"));
    assert!(!order.contains(&"yarn_init"));
}

#[test]
fn test_deploy_then_reconfigure_cycle() {
    let graph = cluster();
    let versions = ConfigStore::new(SqliteBackend::open_in_memory().unwrap());
    for service in ["hdfs", "yarn", "zookeeper"] {
        versions
            .commit(service, &ChangeSet::new("initial").write("site.xml", service))
            .unwrap();
    }

    let store = MemoryDeploymentStore::new();
    let engine = Engine::new(&store).with_versions(&versions);
    let services: Vec<String> = graph.services().into_iter().map(String::from).collect();

    // Nothing deployed yet: every service is a change, from nothing
    let changes = pending_changes(&versions, &store.deployed_versions().unwrap(), &services)
        .unwrap();
    assert_eq!(changes.len(), 3);
    assert!(changes.iter().all(|c| c.from.is_none()));

    let full = DeploymentPlan::from_dag(&graph, &PlanRequest::default()).unwrap();
    let record = engine
        .run(&full, &succeed, &RunOptions::default(), &mut NoProgress)
        .unwrap();
    assert_eq!(record.state, DeploymentState::Success);
    assert_eq!(record.service_versions.len(), 3);

    let deployed = store.deployed_versions().unwrap();
    assert!(
        pending_changes(&versions, &deployed, &services)
            .unwrap()
            .is_empty()
    );

    versions
        .commit("hdfs", &ChangeSet::new("tune").write("site.xml", "hdfs v2"))
        .unwrap();
    let changes = pending_changes(&versions, &deployed, &services).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].service, "hdfs");

    let impact = ImpactResolver::new(&graph, &versions, &ServiceLevelMapper)
        .resolve(&changes)
        .unwrap();
    let plan = DeploymentPlan::from_impact(&graph, &impact).unwrap();
    let record = engine
        .run(&plan, &succeed, &RunOptions::default(), &mut NoProgress)
        .unwrap();
    assert_eq!(record.state, DeploymentState::Success);
    assert!(record.outcome("zookeeper_config").is_none());

    let deployed = store.deployed_versions().unwrap();
    assert!(
        pending_changes(&versions, &deployed, &services)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_unknown_version_is_surfaced() {
    let graph = cluster();
    let versions = ConfigStore::new(SqliteBackend::open_in_memory().unwrap());
    let head = versions
        .commit("hdfs", &ChangeSet::new("initial").write("site.xml", "a"))
        .unwrap();

    let err = ImpactResolver::new(&graph, &versions, &ServiceLevelMapper)
        .resolve(&[ServiceChange {
            service: "hdfs".into(),
            from: Some("0000deadbeef".into()),
            to: head.id,
        }])
        .unwrap_err();
    assert!(matches!(
        err,
        deployment::Error::Config(confstore::Error::UnknownVersion { .. })
    ));
}

#[test]
fn test_reconfigure_rules() {
    let graph = cluster();
    let rules = RuleSet::from_yaml_str(
        r"
hdfs:
  must_include: [yarn]
  must_exclude: [zookeeper]
zookeeper:
  must_include: [hdfs]
yarn:
  must_include: [hdfs]
  must_exclude: [hdfs]
",
    )
    .unwrap();

    let violations = verify_rules(&graph, &rules).unwrap();
    assert_eq!(
        violations,
        vec![
            RuleViolation::Overlap {
                source: "yarn".into(),
                name: "hdfs".into(),
            },
            RuleViolation::MustIncludeMissing {
                source: "yarn".into(),
                name: "hdfs".into(),
            },
            RuleViolation::MustIncludeMissing {
                source: "zookeeper".into(),
                name: "hdfs".into(),
            },
        ]
    );
    assert_eq!(
        violations[2].to_string(),
        "zookeeper reconfiguration should include hdfs"
    );
}

#[test]
fn test_reconfigure_plan_keeps_order_through_noops() {
    let registry = Registry::from_yaml_str(
        "chain.yml",
        r"
- name: zk_config
- name: zk_start
  depends_on: [zk_config]
  noop: true
- name: app_config
  depends_on: [zk_start]
",
    )
    .unwrap();
    let graph = DependencyGraph::build_with(&registry, RulePolicy::lenient()).unwrap();

    let versions = ConfigStore::new(MemoryBackend::new());
    let v1 = versions
        .commit("zk", &ChangeSet::new("initial").write("zoo.cfg", "tickTime=2000"))
        .unwrap();
    let v2 = versions
        .commit("zk", &ChangeSet::new("tune").write("zoo.cfg", "tickTime=3000"))
        .unwrap();

    let impact = ImpactResolver::new(&graph, &versions, &ServiceLevelMapper)
        .resolve(&[ServiceChange {
            service: "zk".into(),
            from: Some(v1.id),
            to: v2.id,
        }])
        .unwrap();
    let plan = DeploymentPlan::from_impact(&graph, &impact).unwrap();

    let order: Vec<&str> = plan.operations.iter().map(|op| op.name()).collect();
    assert_eq!(order, vec!["zk_config", "app_config"]);
}
