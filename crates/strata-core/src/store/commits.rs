//! Graph commit records.

use rusqlite::{params, OptionalExtension};

use super::{parse_enum, parse_json, parse_opt_time, ScanStore, StoreError};
use crate::models::GraphCommitRecord;

impl ScanStore {
    pub fn get_commit_record(
        &self,
        session_id: &str,
    ) -> Result<Option<GraphCommitRecord>, StoreError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT session_id, high_water_row_id, state, nodes_upserted,
                        relationships_upserted, last_verification, committed_at, verified_at
                 FROM graph_commit WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let state: String = row.get(2)?;
                    let verification: Option<String> = row.get(5)?;
                    Ok(GraphCommitRecord {
                        session_id: row.get(0)?,
                        high_water_row_id: row.get(1)?,
                        state: parse_enum(2, &state)?,
                        nodes_upserted: row.get::<_, i64>(3)? as u64,
                        relationships_upserted: row.get::<_, i64>(4)? as u64,
                        last_verification: verification
                            .map(|v| parse_json(5, &v))
                            .transpose()?,
                        committed_at: parse_opt_time(6, row.get(6)?)?,
                        verified_at: parse_opt_time(7, row.get(7)?)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// The session's record, or a fresh `not_committed` one.
    pub fn commit_record_or_new(&self, session_id: &str) -> Result<GraphCommitRecord, StoreError> {
        Ok(self
            .get_commit_record(session_id)?
            .unwrap_or_else(|| GraphCommitRecord::new(session_id)))
    }

    /// Insert or replace the session's record.
    pub fn save_commit_record(&self, record: &GraphCommitRecord) -> Result<(), StoreError> {
        let verification = record
            .last_verification
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO graph_commit (session_id, high_water_row_id, state, nodes_upserted,
                 relationships_upserted, last_verification, committed_at, verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(session_id) DO UPDATE SET
                 high_water_row_id = excluded.high_water_row_id,
                 state = excluded.state,
                 nodes_upserted = excluded.nodes_upserted,
                 relationships_upserted = excluded.relationships_upserted,
                 last_verification = excluded.last_verification,
                 committed_at = excluded.committed_at,
                 verified_at = excluded.verified_at",
            params![
                record.session_id,
                record.high_water_row_id,
                record.state.as_str(),
                record.nodes_upserted as i64,
                record.relationships_upserted as i64,
                verification,
                record.committed_at.map(|t| t.to_rfc3339()),
                record.verified_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}
