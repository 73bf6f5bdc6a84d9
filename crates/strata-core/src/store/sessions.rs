//! Scan session lifecycle.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::{now_string, parse_enum, parse_opt_time, parse_time, ScanStore, StoreError};
use crate::models::{ScanSession, SessionStatus};

const SESSION_COLUMNS: &str = "id, root, recursive, provider_id, status, started_at, finished_at,
     files_seen, bytes_seen, interpreted_count, error_count";

fn map_session(row: &Row<'_>) -> rusqlite::Result<ScanSession> {
    let status: String = row.get(4)?;
    let started_at: String = row.get(5)?;
    Ok(ScanSession {
        id: row.get(0)?,
        root: row.get(1)?,
        recursive: row.get(2)?,
        provider_id: row.get(3)?,
        status: parse_enum(4, &status)?,
        started_at: parse_time(5, &started_at)?,
        finished_at: parse_opt_time(6, row.get(6)?)?,
        files_seen: row.get::<_, i64>(7)? as u64,
        bytes_seen: row.get::<_, i64>(8)? as u64,
        interpreted_count: row.get::<_, i64>(9)? as u64,
        error_count: row.get::<_, i64>(10)? as u64,
    })
}

pub(crate) fn load_session(conn: &Connection, id: &str) -> Result<Option<ScanSession>, StoreError> {
    let sql = format!("SELECT {} FROM scan_session WHERE id = ?1", SESSION_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_session).optional()?)
}

pub(crate) fn require_session(conn: &Connection, id: &str) -> Result<ScanSession, StoreError> {
    load_session(conn, id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
}

impl ScanStore {
    /// Start a new running session.
    pub fn start_session(
        &self,
        root: &str,
        recursive: bool,
        provider_id: &str,
    ) -> Result<ScanSession, StoreError> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO scan_session (id, root, recursive, provider_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                root,
                recursive,
                provider_id,
                SessionStatus::Running.as_str(),
                now_string()
            ],
        )?;
        info!("Started scan session {} for {}", id, root);
        require_session(&conn, &id)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<ScanSession>, StoreError> {
        load_session(&self.conn(), id)
    }

    /// Sessions, newest first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<ScanSession>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM scan_session ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![limit as i64], map_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Move a running session to a terminal status.
    ///
    /// Finishing an already finished session is a no-op that returns it
    /// unchanged.
    pub fn finish_session(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<ScanSession, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                status,
            });
        }

        let conn = self.conn();
        let session = require_session(&conn, id)?;
        if session.status.is_terminal() {
            debug!("Session {} already {}", id, session.status);
            return Ok(session);
        }

        conn.execute(
            "UPDATE scan_session SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_string(), id],
        )?;
        info!("Scan session {} {}", id, status);
        require_session(&conn, id)
    }

    /// Mark a session canceled. Outstanding work is stopped by the owner of
    /// the session's cancel token.
    pub fn cancel_session(&self, id: &str) -> Result<ScanSession, StoreError> {
        self.finish_session(id, SessionStatus::Canceled)
    }
}
