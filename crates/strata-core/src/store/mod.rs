//! Relational index of scan sessions and their rows (SQLite).
//!
//! One connection, serialized behind a mutex. Work that must not interleave
//! within a session (chunked interpretation) is additionally serialized by
//! per-session async locks.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

mod chunk;
mod commits;
mod error;
mod rows;
mod sessions;

pub use chunk::{ChunkOutcome, ChunkRequest};
pub use error::StoreError;
pub use rows::{Appended, SessionSiblings};

use crate::config::ChunkConfig;
use crate::locks::SessionLocks;

const SCHEMA_VERSION: i32 = 2;

/// Columns added in version 2, for stores created at version 1.
const ADD_PROJECTION_COLUMNS: &str =
    "ALTER TABLE scan_row ADD COLUMN revision INTEGER NOT NULL DEFAULT 1;
     ALTER TABLE scan_row ADD COLUMN projected_revision INTEGER NOT NULL DEFAULT 0;";

/// Scan session store.
pub struct ScanStore {
    conn: Mutex<Connection>,
    chunk: ChunkConfig,
    locks: SessionLocks,
}

impl ScanStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>, chunk: ChunkConfig) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        migrate_schema(&conn)?;
        debug!("Opened scan store at {}", path.display());
        Ok(Self::with_connection(conn, chunk))
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory(chunk: ChunkConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate_schema(&conn)?;
        Ok(Self::with_connection(conn, chunk))
    }

    fn with_connection(conn: Connection, chunk: ChunkConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            chunk,
            locks: SessionLocks::new(),
        }
    }

    pub fn chunk_config(&self) -> &ChunkConfig {
        &self.chunk
    }

    /// A poisoned lock still guards a consistent connection: every write
    /// runs inside a transaction that rolls back on unwind.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -64000;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn migrate_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        if version == 1 {
            conn.execute_batch(ADD_PROJECTION_COLUMNS)?;
        }
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!("Migrated scan store schema {} -> {}", version, SCHEMA_VERSION);
    }
    Ok(())
}

pub(crate) fn now_string() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_time(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_time(idx, &v)).transpose()
}

/// Decode a JSON column inside a row mapper.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    value: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_enum<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scans.db");
        let store = ScanStore::open(&path, ChunkConfig::default()).unwrap();
        assert!(path.exists());

        let version: i32 = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db");
        let id = {
            let store = ScanStore::open(&path, ChunkConfig::default()).unwrap();
            store.start_session("/data", true, "local").unwrap().id
        };
        let store = ScanStore::open(&path, ChunkConfig::default()).unwrap();
        assert!(store.get_session(&id).unwrap().is_some());
    }

    #[test]
    fn test_version_one_store_gains_projection_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE scan_row (
                 session_id TEXT NOT NULL, row_id INTEGER NOT NULL, path TEXT NOT NULL,
                 parent_dir TEXT NOT NULL, file_name TEXT NOT NULL,
                 checksum_key TEXT NOT NULL, interpretation TEXT,
                 PRIMARY KEY (session_id, row_id));
             INSERT INTO scan_row VALUES ('s', 1, '/a.txt', '/', 'a.txt', 'k', NULL);
             PRAGMA user_version = 1;",
        )
        .unwrap();

        migrate_schema(&conn).unwrap();
        let (revision, projected): (i64, i64) = conn
            .query_row(
                "SELECT revision, projected_revision FROM scan_row WHERE row_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((revision, projected), (1, 0));
    }
}
