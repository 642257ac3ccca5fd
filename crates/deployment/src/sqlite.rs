//! SQLite deployment store

use crate::error::{Error, Result};
use crate::store::{DeploymentStore, counts_as_deployed};
use crate::types::{
    DeploymentId, DeploymentRecord, DeploymentScope, DeploymentState, OperationOutcome,
    OperationState,
};
use chrono::{DateTime, Utc};
use confstore::VersionId;
use opgraph::OperationKey;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS deployments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        scope TEXT NOT NULL,
        filter TEXT,
        operations TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        ended_at TEXT,
        service_versions TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS operation_outcomes (
        deployment_id INTEGER NOT NULL REFERENCES deployments(id),
        position INTEGER NOT NULL,
        operation TEXT NOT NULL,
        state TEXT NOT NULL,
        started_at TEXT,
        ended_at TEXT,
        payload TEXT NOT NULL,
        error TEXT,
        noop INTEGER NOT NULL,
        carried_over INTEGER NOT NULL,
        PRIMARY KEY (deployment_id, position)
    );

    CREATE INDEX IF NOT EXISTS idx_deployments_scope ON deployments(scope);
";

const SELECT_DEPLOYMENT: &str = "SELECT id, kind, scope, filter, operations, state, created_at, started_at, ended_at, service_versions FROM deployments";

/// Deployment records stored in a SQLite database
///
/// Every `update` rewrites the record and its outcomes in one transaction.
pub struct SqliteDeploymentStore {
    conn: Mutex<Connection>,
}

impl SqliteDeploymentStore {
    /// Open or create a database at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn query(
        conn: &Connection,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DeploymentRecord>> {
        let mut stmt = conn.prepare(&format!("{SELECT_DEPLOYMENT} {clause}"))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(DeploymentRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    scope: row.get(2)?,
                    filter: row.get(3)?,
                    operations: row.get(4)?,
                    state: row.get(5)?,
                    created_at: row.get(6)?,
                    started_at: row.get(7)?,
                    ended_at: row.get(8)?,
                    service_versions: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|row| {
                let outcomes = load_outcomes(conn, row.id)?;
                row.into_record(outcomes)
            })
            .collect()
    }
}

struct DeploymentRow {
    id: i64,
    kind: String,
    scope: String,
    filter: Option<String>,
    operations: String,
    state: String,
    created_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    service_versions: String,
}

impl DeploymentRow {
    fn into_record(self, outcomes: Vec<OperationOutcome>) -> Result<DeploymentRecord> {
        let id = self.id as DeploymentId;
        Ok(DeploymentRecord {
            id,
            kind: serde_json::from_str(&self.kind)?,
            scope: serde_json::from_str(&self.scope)?,
            filter: self
                .filter
                .as_deref()
                .map(|f| serde_json::from_str(f))
                .transpose()?,
            operations: serde_json::from_str(&self.operations)?,
            state: self
                .state
                .parse::<DeploymentState>()
                .map_err(|reason| corrupt(id, reason))?,
            created_at: parse_time(id, &self.created_at)?,
            started_at: parse_optional_time(id, self.started_at.as_deref())?,
            ended_at: parse_optional_time(id, self.ended_at.as_deref())?,
            outcomes,
            service_versions: serde_json::from_str(&self.service_versions)?,
        })
    }
}

fn corrupt(id: DeploymentId, reason: impl Into<String>) -> Error {
    Error::CorruptRecord {
        id,
        reason: reason.into(),
    }
}

fn parse_time(id: DeploymentId, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("bad timestamp '{value}': {e}")))
}

fn parse_optional_time(id: DeploymentId, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_time(id, v)).transpose()
}

fn format_time(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn load_outcomes(conn: &Connection, deployment_id: i64) -> Result<Vec<OperationOutcome>> {
    let mut stmt = conn.prepare(
        "SELECT operation, state, started_at, ended_at, payload, error, noop, carried_over
         FROM operation_outcomes WHERE deployment_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([deployment_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, bool>(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let id = deployment_id as DeploymentId;
    let mut outcomes = Vec::with_capacity(rows.len());
    for (operation, state, started_at, ended_at, payload, error, noop, carried_over) in rows {
        let operation = OperationKey::parse(&operation)
            .map_err(|e| corrupt(id, format!("outcome {operation}: {e}")))?;
        let state = state
            .parse::<OperationState>()
            .map_err(|e| corrupt(id, format!("outcome {operation}: {e}")))?;
        outcomes.push(OperationOutcome {
            operation,
            state,
            started_at: parse_optional_time(id, started_at.as_deref())?,
            ended_at: parse_optional_time(id, ended_at.as_deref())?,
            payload,
            error: error
                .as_deref()
                .map(|e| serde_json::from_str(e))
                .transpose()?,
            noop,
            carried_over,
        });
    }
    Ok(outcomes)
}

impl DeploymentStore for SqliteDeploymentStore {
    fn create(&self, record: &mut DeploymentRecord) -> Result<DeploymentId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO deployments
                (kind, scope, filter, operations, state, created_at, started_at, ended_at, service_versions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                serde_json::to_string(&record.kind)?,
                serde_json::to_string(&record.scope)?,
                record
                    .filter
                    .as_ref()
                    .map(|f| serde_json::to_string(f))
                    .transpose()?,
                serde_json::to_string(&record.operations)?,
                record.state.as_str(),
                record.created_at.to_rfc3339(),
                format_time(record.started_at),
                format_time(record.ended_at),
                serde_json::to_string(&record.service_versions)?,
            ],
        )?;
        record.id = conn.last_insert_rowid() as DeploymentId;
        drop(conn);

        if !record.outcomes.is_empty() {
            self.update(record)?;
        }
        Ok(record.id)
    }

    fn update(&self, record: &DeploymentRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let id = record.id as i64;

        let changed = tx.execute(
            "UPDATE deployments SET state = ?2, started_at = ?3, ended_at = ?4, service_versions = ?5
             WHERE id = ?1",
            params![
                id,
                record.state.as_str(),
                format_time(record.started_at),
                format_time(record.ended_at),
                serde_json::to_string(&record.service_versions)?,
            ],
        )?;
        if changed == 0 {
            return Err(crate::error::Error::DeploymentNotFound { id: record.id });
        }

        tx.execute(
            "DELETE FROM operation_outcomes WHERE deployment_id = ?1",
            [id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO operation_outcomes
                    (deployment_id, position, operation, state, started_at, ended_at, payload, error, noop, carried_over)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (position, outcome) in record.outcomes.iter().enumerate() {
                insert.execute(params![
                    id,
                    position as i64,
                    outcome.operation.name(),
                    outcome.state.as_str(),
                    format_time(outcome.started_at),
                    format_time(outcome.ended_at),
                    outcome.payload,
                    outcome
                        .error
                        .as_ref()
                        .map(|e| serde_json::to_string(e))
                        .transpose()?,
                    outcome.noop,
                    outcome.carried_over,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>> {
        let conn = self.conn();
        Ok(Self::query(&conn, "WHERE id = ?1", [id as i64])?
            .into_iter()
            .next())
    }

    fn last(&self) -> Result<Option<DeploymentRecord>> {
        let conn = self.conn();
        Ok(Self::query(&conn, "ORDER BY id DESC LIMIT 1", ())?
            .into_iter()
            .next())
    }

    fn latest_for_scope(&self, scope: &DeploymentScope) -> Result<Option<DeploymentRecord>> {
        let conn = self.conn();
        let scope = serde_json::to_string(scope)?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM deployments WHERE scope = ?1 ORDER BY id DESC LIMIT 1",
                [scope],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(Self::query(&conn, "WHERE id = ?1", [id])?.into_iter().next()),
            None => Ok(None),
        }
    }

    fn deployed_versions(&self) -> Result<BTreeMap<String, VersionId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, state, service_versions FROM deployments ORDER BY id DESC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut versions = BTreeMap::new();
        for (id, state, service_versions) in rows {
            let id = id as DeploymentId;
            let state = state
                .parse::<DeploymentState>()
                .map_err(|reason| corrupt(id, reason))?;
            if !counts_as_deployed(state) {
                continue;
            }
            let recorded: BTreeMap<String, VersionId> = serde_json::from_str(&service_versions)?;
            for (service, version) in recorded {
                versions.entry(service).or_insert(version);
            }
        }
        Ok(versions)
    }

    fn list(&self, limit: usize) -> Result<Vec<DeploymentRecord>> {
        let conn = self.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Self::query(&conn, "ORDER BY id DESC LIMIT ?1", [limit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionError;
    use crate::types::PlanKind;
    use opgraph::FilterSpec;

    fn key(name: &str) -> OperationKey {
        OperationKey::parse(name).unwrap()
    }

    fn sample() -> DeploymentRecord {
        let mut record = DeploymentRecord::new(
            PlanKind::Dag,
            DeploymentScope::Dag {
                targets: vec!["hdfs_config".into()],
                sources: vec![],
            },
            Some(FilterSpec::glob("hdfs_*")),
            vec![key("hdfs_install"), key("hdfs_config")],
        );
        record.state = DeploymentState::Running;
        record.started_at = Some(Utc::now());

        let mut done = OperationOutcome::pending(key("hdfs_install"), false);
        done.state = OperationState::Success;
        done.payload = "ok".into();
        done.started_at = Some(Utc::now());
        done.ended_at = Some(Utc::now());
        let mut failed = OperationOutcome::pending(key("hdfs_config"), false);
        failed.state = OperationState::Failure;
        failed.error = Some(ExecutionError::failed("exit status 2"));
        record.outcomes = vec![done, failed];
        record
            .service_versions
            .insert("hdfs".into(), VersionId::from("abc"));
        record
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.db");

        let mut record = sample();
        {
            let store = SqliteDeploymentStore::open(&path).unwrap();
            store.create(&mut record).unwrap();
            record.state = DeploymentState::Failure;
            record.ended_at = Some(Utc::now());
            store.update(&record).unwrap();
        }

        let store = SqliteDeploymentStore::open(&path).unwrap();
        let loaded = store.get(record.id).unwrap().unwrap();
        assert_eq!(loaded.state, DeploymentState::Failure);
        assert_eq!(loaded.scope, record.scope);
        assert_eq!(loaded.filter, record.filter);
        assert_eq!(loaded.operations, record.operations);
        assert_eq!(loaded.outcomes.len(), 2);
        assert_eq!(loaded.outcomes[0].payload, "ok");
        assert_eq!(
            loaded.outcomes[1].error,
            Some(ExecutionError::failed("exit status 2"))
        );
        assert_eq!(loaded.service_versions, record.service_versions);
    }

    #[test]
    fn test_latest_for_scope_and_list() {
        let store = SqliteDeploymentStore::open_in_memory().unwrap();
        let mut first = sample();
        let mut second = DeploymentRecord::new(PlanKind::Dag, DeploymentScope::All, None, vec![]);
        let mut third = sample();
        store.create(&mut first).unwrap();
        store.create(&mut second).unwrap();
        store.create(&mut third).unwrap();

        let latest = store.latest_for_scope(&first.scope).unwrap().unwrap();
        assert_eq!(latest.id, third.id);
        assert_eq!(store.last().unwrap().unwrap().id, third.id);

        let ids: Vec<DeploymentId> = store.list(2).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third.id, second.id]);
    }

    #[test]
    fn test_update_missing_record() {
        let store = SqliteDeploymentStore::open_in_memory().unwrap();
        let mut record = sample();
        record.id = 99;
        assert!(store.update(&record).is_err());
    }

    fn corrupt_after(sql: &str) -> Error {
        let store = SqliteDeploymentStore::open_in_memory().unwrap();
        let mut record = sample();
        store.create(&mut record).unwrap();
        store.conn().execute(sql, []).unwrap();
        store.get(record.id).unwrap_err()
    }

    #[test]
    fn test_unparseable_outcome_is_an_error() {
        let err = corrupt_after(
            "UPDATE operation_outcomes SET operation = 'broken' WHERE position = 1",
        );
        assert!(matches!(err, Error::CorruptRecord { id: 1, .. }), "{err}");
    }

    #[test]
    fn test_unknown_states_are_errors() {
        let err = corrupt_after("UPDATE operation_outcomes SET state = 'exploded'");
        assert!(matches!(err, Error::CorruptRecord { .. }), "{err}");

        let err = corrupt_after("UPDATE deployments SET state = 'bogus'");
        assert!(matches!(err, Error::CorruptRecord { .. }), "{err}");
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let err = corrupt_after("UPDATE deployments SET created_at = 'yesterday'");
        assert!(
            matches!(&err, Error::CorruptRecord { reason, .. } if reason.contains("yesterday")),
            "{err}"
        );
    }

    #[test]
    fn test_deployed_versions_reads_newest_deployed_record() {
        let store = SqliteDeploymentStore::open_in_memory().unwrap();

        let mut old = sample();
        old.state = DeploymentState::Success;
        old.service_versions.insert("yarn".into(), VersionId::from("y1"));
        store.create(&mut old).unwrap();

        let mut failed = sample();
        failed.state = DeploymentState::Failure;
        failed.service_versions.insert("hdfs".into(), VersionId::from("broken"));
        store.create(&mut failed).unwrap();

        let mut partial = sample();
        partial.state = DeploymentState::PartialFailure;
        partial.service_versions.insert("hdfs".into(), VersionId::from("v2"));
        store.create(&mut partial).unwrap();

        let versions = store.deployed_versions().unwrap();
        assert_eq!(versions["hdfs"], VersionId::from("v2"));
        assert_eq!(versions["yarn"], VersionId::from("y1"));
    }
}
