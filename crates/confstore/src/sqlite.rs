//! SQLite history backend

use crate::backend::{HistoryBackend, check_linear};
use crate::error::Result;
use crate::types::{Version, VersionId};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS versions (
        id TEXT PRIMARY KEY,
        service TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        parent TEXT,
        message TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (service, sequence)
    );

    CREATE TABLE IF NOT EXISTS version_files (
        version_id TEXT NOT NULL REFERENCES versions(id),
        path TEXT NOT NULL,
        hash TEXT NOT NULL,
        PRIMARY KEY (version_id, path)
    );

    CREATE TABLE IF NOT EXISTS blobs (
        hash TEXT PRIMARY KEY,
        content BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_versions_service ON versions(service, sequence);
";

/// History backend stored in a SQLite database
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database at the given path
    ///
    /// Creates the file, its parent directory and the tables if needed.
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
}

type VersionRow = (String, String, i64, Option<String>, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn load_files(conn: &Connection, version_id: &str) -> Result<BTreeMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT path, hash FROM version_files WHERE version_id = ?1 ORDER BY path")?;
    let files = stmt
        .query_map([version_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
    Ok(files)
}

fn into_version(conn: &Connection, row: VersionRow) -> Result<Version> {
    let (id, service, sequence, parent, message, created_at) = row;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("Version {id} has an unreadable timestamp ({e})");
            DateTime::<Utc>::UNIX_EPOCH
        });
    Ok(Version {
        files: load_files(conn, &id)?,
        id: VersionId::new(id),
        service,
        sequence: sequence as u64,
        parent: parent.map(VersionId::new),
        message,
        created_at,
    })
}

fn head_of(conn: &Connection, service: &str) -> Result<Option<Version>> {
    let row = conn
        .query_row(
            "SELECT id, service, sequence, parent, message, created_at
             FROM versions WHERE service = ?1
             ORDER BY sequence DESC LIMIT 1",
            [service],
            read_row,
        )
        .optional()?;
    row.map(|row| into_version(conn, row)).transpose()
}

impl HistoryBackend for SqliteBackend {
    fn services(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT service FROM versions ORDER BY service")?;
        let services = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(services)
    }

    fn versions(&self, service: &str) -> Result<Vec<Version>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, service, sequence, parent, message, created_at
             FROM versions WHERE service = ?1
             ORDER BY sequence",
        )?;
        let rows = stmt
            .query_map([service], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| into_version(&conn, row))
            .collect()
    }

    fn head(&self, service: &str) -> Result<Option<Version>> {
        head_of(&self.conn(), service)
    }

    fn append(&self, version: &Version) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        check_linear(head_of(&tx, &version.service)?.as_ref(), version)?;

        tx.execute(
            "INSERT INTO versions (id, service, sequence, parent, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                version.id.as_str(),
                version.service,
                version.sequence as i64,
                version.parent.as_ref().map(VersionId::as_str),
                version.message,
                version.created_at.to_rfc3339(),
            ],
        )?;
        for (path, hash) in &version.files {
            tx.execute(
                "INSERT INTO version_files (version_id, path, hash) VALUES (?1, ?2, ?3)",
                params![version.id.as_str(), path, hash],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn put_blob(&self, hash: &str, content: &[u8]) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO blobs (hash, content) VALUES (?1, ?2)",
            params![hash, content],
        )?;
        Ok(())
    }

    fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let content = self
            .conn()
            .query_row("SELECT content FROM blobs WHERE hash = ?1", [hash], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(content)
    }
}
