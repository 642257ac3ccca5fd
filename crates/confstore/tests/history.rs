use confstore::{ChangeSet, ConfigStore, Error, SqliteBackend, VersionedConfig};
use std::sync::Arc;
use std::thread;

#[test]
fn test_sqlite_history_is_linear_and_diffable() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("config.db");

    let (v1, v3) = {
        let store = ConfigStore::new(SqliteBackend::open(&db).unwrap());
        let v1 = store
            .commit(
                "hdfs",
                &ChangeSet::new("initial")
                    .write("hdfs-site.xml", "replication=3")
                    .write("core-site.xml", "fs=hdfs://nn"),
            )
            .unwrap();
        store
            .commit("hdfs", &ChangeSet::new("replication").write("hdfs-site.xml", "replication=2"))
            .unwrap();
        let v3 = store
            .commit("hdfs", &ChangeSet::new("revert").write("hdfs-site.xml", "replication=3"))
            .unwrap();
        (v1, v3)
    };

    let store = ConfigStore::new(SqliteBackend::open(&db).unwrap());
    let history = store.history("hdfs").unwrap();
    assert_eq!(history.len(), 3);
    for pair in history.windows(2) {
        assert_eq!(pair[1].parent.as_ref(), Some(&pair[0].id));
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }

    // Same content as v1 but a different place in history
    assert_ne!(v1.id, v3.id);
    assert!(store.diff("hdfs", &v1.id, &v3.id).unwrap().is_empty());
    assert_eq!(store.current_version("hdfs").unwrap(), v3.id);
    assert_eq!(
        store.read_file("hdfs", &v3.id, "core-site.xml").unwrap().unwrap(),
        b"fs=hdfs://nn"
    );
}

#[test]
fn test_concurrent_commits_serialise_per_service() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ConfigStore::new(
        SqliteBackend::open(&dir.path().join("config.db")).unwrap(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let service = if i % 2 == 0 { "hdfs" } else { "yarn" };
                store
                    .commit(
                        service,
                        &ChangeSet::new(format!("change {i}")).write("site.xml", format!("v{i}")),
                    )
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for service in ["hdfs", "yarn"] {
        let history = store.history(service).unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[0].parent.is_none());
        for pair in history.windows(2) {
            assert_eq!(pair[1].parent.as_ref(), Some(&pair[0].id));
        }
    }
}

#[test]
fn test_unknown_service_errors() {
    let store = ConfigStore::new(SqliteBackend::open_in_memory().unwrap());
    assert!(matches!(
        store.history("spark"),
        Err(Error::UnknownService { .. })
    ));
    assert!(matches!(
        store.current_version("spark"),
        Err(Error::UnknownService { .. })
    ));
}
