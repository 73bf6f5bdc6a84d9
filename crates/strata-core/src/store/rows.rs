//! Scan rows: append with dedupe, cursor reads, interpretation results.

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use super::sessions::require_session;
use super::{now_string, parse_json, parse_time, ScanStore, StoreError};
use crate::interpreter::SiblingIndex;
use crate::models::{FileDescriptor, InterpretationResult, ScanRow, SessionStatus};

const ROW_COLUMNS: &str = "session_id, row_id, path, size, modified, extension, provider_file_id,
     checksum, interpretation, first_seen, last_seen, revision";

fn map_row(row: &Row<'_>) -> rusqlite::Result<ScanRow> {
    let path: String = row.get(2)?;
    let interpretation: Option<String> = row.get(8)?;
    let first_seen: String = row.get(9)?;
    let last_seen: String = row.get(10)?;

    let descriptor = FileDescriptor {
        path,
        size: row.get::<_, i64>(3)? as u64,
        modified: row.get(4)?,
        extension: row.get(5)?,
        provider_file_id: row.get(6)?,
        checksum: row.get(7)?,
    };

    Ok(ScanRow {
        session_id: row.get(0)?,
        row_id: row.get(1)?,
        descriptor,
        interpretation: interpretation.map(|j| parse_json(8, &j)).transpose()?,
        revision: row.get(11)?,
        first_seen: parse_time(9, &first_seen)?,
        last_seen: parse_time(10, &last_seen)?,
    })
}

/// Where an appended descriptor landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// Inserted as a new row of the session.
    New(i64),
    /// Already a row of the session.
    Known(i64),
    /// Already recorded by an earlier completed scan of the same target.
    Earlier { session_id: String, row_id: i64 },
}

impl Appended {
    pub fn is_new(&self) -> bool {
        matches!(self, Appended::New(_))
    }
}

impl ScanStore {
    /// Append one batch of descriptors in a single transaction.
    ///
    /// Returns one entry per descriptor, in input order. A file already
    /// known under the same checksum key, either to this session or to an
    /// earlier completed session of the same root, recursion and provider,
    /// is not inserted again: the existing row only has `last_seen`
    /// refreshed.
    pub fn append_rows(
        &self,
        session_id: &str,
        batch: &[FileDescriptor],
    ) -> Result<Vec<Appended>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let session = require_session(&tx, session_id)?;
        if session.status != SessionStatus::Running {
            return Err(StoreError::SessionNotRunning {
                id: session_id.to_string(),
                status: session.status,
            });
        }
        let mut next_row_id: i64 = tx.query_row(
            "SELECT next_row_id FROM scan_session WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let now = now_string();
        let mut appended = Vec::with_capacity(batch.len());
        let (mut inserted, mut seen_files, mut seen_bytes) = (0i64, 0i64, 0i64);
        {
            let mut find = tx.prepare_cached(
                "SELECT row_id FROM scan_row
                 WHERE session_id = ?1 AND path = ?2 AND checksum_key = ?3",
            )?;
            let mut find_earlier = tx.prepare_cached(
                "SELECT r.session_id, r.row_id FROM scan_row r
                 JOIN scan_session s ON s.id = r.session_id
                 WHERE r.path = ?1 AND r.checksum_key = ?2
                   AND s.root = ?3 AND s.recursive = ?4 AND s.provider_id = ?5
                   AND s.status = ?6
                 ORDER BY s.started_at DESC
                 LIMIT 1",
            )?;
            let mut touch = tx.prepare_cached(
                "UPDATE scan_row SET last_seen = ?1 WHERE session_id = ?2 AND row_id = ?3",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO scan_row (session_id, row_id, path, parent_dir, file_name, size,
                     modified, extension, provider_file_id, checksum, checksum_key,
                     first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            )?;

            for fd in batch {
                let key = fd.checksum_key();
                let own: Option<i64> = find
                    .query_row(params![session_id, fd.path, key], |row| row.get(0))
                    .optional()?;
                if let Some(row_id) = own {
                    touch.execute(params![now, session_id, row_id])?;
                    appended.push(Appended::Known(row_id));
                    continue;
                }

                seen_files += 1;
                seen_bytes += fd.size as i64;

                let earlier: Option<(String, i64)> = find_earlier
                    .query_row(
                        params![
                            fd.path,
                            key,
                            session.root,
                            session.recursive,
                            session.provider_id,
                            SessionStatus::Completed.as_str()
                        ],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                if let Some((owner, row_id)) = earlier {
                    touch.execute(params![now, owner, row_id])?;
                    appended.push(Appended::Earlier {
                        session_id: owner,
                        row_id,
                    });
                    continue;
                }

                insert.execute(params![
                    session_id,
                    next_row_id,
                    fd.path,
                    fd.parent_dir(),
                    fd.file_name(),
                    fd.size as i64,
                    fd.modified,
                    fd.extension,
                    fd.provider_file_id,
                    fd.checksum,
                    key,
                    now,
                ])?;
                appended.push(Appended::New(next_row_id));
                next_row_id += 1;
                inserted += 1;
            }
        }

        tx.execute(
            "UPDATE scan_session
             SET next_row_id = ?1, files_seen = files_seen + ?2, bytes_seen = bytes_seen + ?3
             WHERE id = ?4",
            params![next_row_id, seen_files, seen_bytes, session_id],
        )?;
        tx.commit()?;

        debug!(
            "Appended {} descriptors to session {} ({} new rows)",
            batch.len(),
            session_id,
            inserted
        );
        Ok(appended)
    }

    /// Up to `limit` rows with `row_id > after`, in row id order.
    pub fn rows_after(
        &self,
        session_id: &str,
        after: i64,
        limit: usize,
    ) -> Result<Vec<ScanRow>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM scan_row
             WHERE session_id = ?1 AND row_id > ?2
             ORDER BY row_id
             LIMIT ?3",
            ROW_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![session_id, after, limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn has_rows_after(&self, session_id: &str, after: i64) -> Result<bool, StoreError> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM scan_row WHERE session_id = ?1 AND row_id > ?2)",
            params![session_id, after],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Up to `limit` rows after `after` whose current revision has not been
    /// projected into the graph.
    pub fn unprojected_rows(
        &self,
        session_id: &str,
        after: i64,
        limit: usize,
    ) -> Result<Vec<ScanRow>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM scan_row
             WHERE session_id = ?1 AND row_id > ?2 AND revision > projected_revision
             ORDER BY row_id
             LIMIT ?3",
            ROW_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![session_id, after, limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn unprojected_count(&self, session_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scan_row
             WHERE session_id = ?1 AND revision > projected_revision",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Record that `rows` reached the graph at the revisions they carry.
    ///
    /// A row whose interpretation changed after it was read stays pending.
    pub fn mark_projected(&self, session_id: &str, rows: &[ScanRow]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut mark = tx.prepare_cached(
                "UPDATE scan_row SET projected_revision = MAX(projected_revision, ?1)
                 WHERE session_id = ?2 AND row_id = ?3",
            )?;
            for row in rows {
                mark.execute(params![row.revision, session_id, row.row_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_row(&self, session_id: &str, row_id: i64) -> Result<Option<ScanRow>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM scan_row WHERE session_id = ?1 AND row_id = ?2",
            ROW_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![session_id, row_id], map_row)
            .optional()?)
    }

    pub fn row_count(&self, session_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scan_row WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Distinct `(paths, folders)` of a session, the basis of graph
    /// verification.
    pub fn distinct_counts(&self, session_id: &str) -> Result<(u64, u64), StoreError> {
        let conn = self.conn();
        let (paths, folders): (i64, i64) = conn.query_row(
            "SELECT COUNT(DISTINCT path), COUNT(DISTINCT parent_dir)
             FROM scan_row WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((paths as u64, folders as u64))
    }

    /// Whether the session has a row named `name` in directory `dir`.
    pub fn has_sibling(
        &self,
        session_id: &str,
        dir: &str,
        name: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM scan_row
                           WHERE session_id = ?1 AND parent_dir = ?2 AND file_name = ?3)",
            params![session_id, dir, name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Store `result` for a row.
    ///
    /// An identical outcome (ignoring duration) is an idempotent overwrite.
    /// A different outcome needs `overwrite`. Session counters move by the
    /// difference, so re-recording never double counts. Any change of
    /// outcome bumps the row's revision, so the next commit re-projects it.
    pub fn record_interpretation(
        &self,
        session_id: &str,
        row_id: i64,
        result: &InterpretationResult,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let session = require_session(&tx, session_id)?;
        if session.status == SessionStatus::Canceled {
            return Err(StoreError::SessionCanceled(session_id.to_string()));
        }

        let previous: Option<Option<String>> = tx
            .query_row(
                "SELECT interpretation FROM scan_row WHERE session_id = ?1 AND row_id = ?2",
                params![session_id, row_id],
                |row| row.get(0),
            )
            .optional()?;
        let previous = match previous {
            None => {
                return Err(StoreError::RowNotFound {
                    session_id: session_id.to_string(),
                    row_id,
                })
            }
            Some(json) => json
                .map(|j| serde_json::from_str::<InterpretationResult>(&j))
                .transpose()?,
        };

        let (mut interpreted, mut errors) = (0i64, 0i64);
        match &previous {
            Some(old) if old.same_outcome(result) => {}
            Some(old) => {
                if !overwrite {
                    return Err(StoreError::AlreadyInterpreted {
                        session_id: session_id.to_string(),
                        row_id,
                    });
                }
                if old.is_error() {
                    errors -= 1;
                } else {
                    interpreted -= 1;
                }
                if result.is_error() {
                    errors += 1;
                } else {
                    interpreted += 1;
                }
            }
            None => {
                if result.is_error() {
                    errors += 1;
                } else {
                    interpreted += 1;
                }
            }
        }

        let changed = !matches!(&previous, Some(old) if old.same_outcome(result));
        tx.execute(
            "UPDATE scan_row SET interpretation = ?1, revision = revision + ?2
             WHERE session_id = ?3 AND row_id = ?4",
            params![serde_json::to_string(result)?, changed as i64, session_id, row_id],
        )?;
        if interpreted != 0 || errors != 0 {
            tx.execute(
                "UPDATE scan_session
                 SET interpreted_count = interpreted_count + ?1, error_count = error_count + ?2
                 WHERE id = ?3",
                params![interpreted, errors, session_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Sibling lookups against one session's rows, for rule evaluation.
pub struct SessionSiblings<'a> {
    store: &'a ScanStore,
    session_id: &'a str,
}

impl<'a> SessionSiblings<'a> {
    pub fn new(store: &'a ScanStore, session_id: &'a str) -> Self {
        Self { store, session_id }
    }
}

impl SiblingIndex for SessionSiblings<'_> {
    fn has_sibling(&self, dir: &str, name: &str) -> bool {
        self.store
            .has_sibling(self.session_id, dir, name)
            .unwrap_or_else(|e| {
                warn!("Sibling lookup in {} failed: {}", dir, e);
                false
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkConfig;
    use crate::models::ErrorKind;
    use serde_json::Map;

    fn store() -> ScanStore {
        ScanStore::open_in_memory(ChunkConfig::default()).unwrap()
    }

    fn files() -> Vec<FileDescriptor> {
        vec![
            FileDescriptor::new("/data/a.py", 10, 100),
            FileDescriptor::new("/data/b.csv", 20, 100),
            FileDescriptor::new("/data/sub/c.md", 30, 100),
        ]
    }

    fn ok(n: i64) -> InterpretationResult {
        let mut data = Map::new();
        data.insert("n".to_string(), n.into());
        InterpretationResult::success("text", "1.0.0", data)
    }

    #[test]
    fn test_append_assigns_gap_free_ids() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        assert_eq!(
            store.append_rows(&id, &files()[..2]).unwrap(),
            vec![Appended::New(1), Appended::New(2)]
        );
        assert_eq!(store.append_rows(&id, &files()[2..]).unwrap(), vec![Appended::New(3)]);

        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.files_seen, 3);
        assert_eq!(session.bytes_seen, 60);
    }

    #[test]
    fn test_append_dedupes_known_files() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();
        let before = store.get_row(&id, 1).unwrap().unwrap();

        let again = store.append_rows(&id, &files()).unwrap();
        assert_eq!(
            again,
            vec![Appended::Known(1), Appended::Known(2), Appended::Known(3)]
        );
        assert_eq!(store.row_count(&id).unwrap(), 3);
        assert_eq!(store.get_session(&id).unwrap().unwrap().files_seen, 3);

        let after = store.get_row(&id, 1).unwrap().unwrap();
        assert_eq!(after.first_seen, before.first_seen);
        assert!(after.last_seen >= before.last_seen);
    }

    #[test]
    fn test_changed_file_gets_new_row() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()[..1]).unwrap();
        let changed = FileDescriptor::new("/data/a.py", 11, 200);
        assert_eq!(store.append_rows(&id, &[changed]).unwrap(), vec![Appended::New(2)]);
        assert_eq!(store.distinct_counts(&id).unwrap(), (1, 1));
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        let fd = FileDescriptor::new("/data/a.py", 10, 100);
        let ids = store.append_rows(&id, &[fd.clone(), fd]).unwrap();
        assert_eq!(ids, vec![Appended::New(1), Appended::Known(1)]);
    }

    #[test]
    fn test_rescan_dedupes_against_completed_session() {
        let store = store();
        let first = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&first, &files()).unwrap();
        store.finish_session(&first, SessionStatus::Completed).unwrap();
        let before = store.get_row(&first, 2).unwrap().unwrap();

        let second = store.start_session("/data", true, "local").unwrap().id;
        let mut batch = files();
        batch.push(FileDescriptor::new("/data/d.txt", 5, 100));
        let appended = store.append_rows(&second, &batch).unwrap();
        assert_eq!(
            appended[1],
            Appended::Earlier {
                session_id: first.clone(),
                row_id: 2
            }
        );
        assert_eq!(appended[3], Appended::New(1));
        assert_eq!(appended.iter().filter(|a| a.is_new()).count(), 1);
        assert_eq!(store.row_count(&second).unwrap(), 1);

        let after = store.get_row(&first, 2).unwrap().unwrap();
        assert_eq!(after.first_seen, before.first_seen);
        assert!(after.last_seen >= before.last_seen);

        let session = store.get_session(&second).unwrap().unwrap();
        assert_eq!(session.files_seen, 4);
        assert_eq!(session.bytes_seen, 65);
        let earlier = store.get_session(&first).unwrap().unwrap();
        assert_eq!(earlier.status, SessionStatus::Completed);
    }

    #[test]
    fn test_rescan_ignores_other_targets_and_canceled_sessions() {
        let store = store();
        let canceled = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&canceled, &files()).unwrap();
        store.cancel_session(&canceled).unwrap();

        let shallow = store.start_session("/data", false, "local").unwrap().id;
        store.append_rows(&shallow, &files()).unwrap();
        store.finish_session(&shallow, SessionStatus::Completed).unwrap();

        let id = store.start_session("/data", true, "local").unwrap().id;
        let appended = store.append_rows(&id, &files()).unwrap();
        assert!(appended.iter().all(Appended::is_new));
    }

    #[test]
    fn test_changed_outcome_is_pending_projection() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();
        assert_eq!(store.unprojected_count(&id).unwrap(), 3);

        let rows = store.rows_after(&id, 0, 10).unwrap();
        store.mark_projected(&id, &rows).unwrap();
        assert_eq!(store.unprojected_count(&id).unwrap(), 0);

        store.record_interpretation(&id, 2, &ok(1), false).unwrap();
        store.record_interpretation(&id, 2, &ok(1), false).unwrap();
        let pending = store.unprojected_rows(&id, 0, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].row_id, 2);
        assert_eq!(pending[0].revision, 2);

        // Projected at a stale revision: still pending.
        store.mark_projected(&id, &rows).unwrap();
        assert_eq!(store.unprojected_count(&id).unwrap(), 1);
        store.mark_projected(&id, &pending).unwrap();
        assert_eq!(store.unprojected_count(&id).unwrap(), 0);
    }

    #[test]
    fn test_append_requires_running_session() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.finish_session(&id, SessionStatus::Completed).unwrap();
        let err = store.append_rows(&id, &files()).unwrap_err();
        assert!(matches!(err, StoreError::SessionNotRunning { .. }));

        let err = store.append_rows("missing", &files()).unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[test]
    fn test_rows_after_and_cursor() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();

        let page = store.rows_after(&id, 1, 10).unwrap();
        let ids: Vec<i64> = page.iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(page[0].descriptor.extension, ".csv");
        assert!(store.has_rows_after(&id, 2).unwrap());
        assert!(!store.has_rows_after(&id, 3).unwrap());
    }

    #[test]
    fn test_record_interpretation_counts_once() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();

        store.record_interpretation(&id, 1, &ok(1), false).unwrap();
        store.record_interpretation(&id, 1, &ok(1), false).unwrap();
        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.interpreted_count, 1);

        let row = store.get_row(&id, 1).unwrap().unwrap();
        assert_eq!(row.interpretation.unwrap().data["n"], 1);
    }

    #[test]
    fn test_record_different_outcome_needs_overwrite() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();
        store.record_interpretation(&id, 1, &ok(1), false).unwrap();

        let err = store.record_interpretation(&id, 1, &ok(2), false).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInterpreted { row_id: 1, .. }));

        let failed = InterpretationResult::error("text", "1.0.0", ErrorKind::ParseError, "bad", None);
        store.record_interpretation(&id, 1, &failed, true).unwrap();
        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.interpreted_count, 0);
        assert_eq!(session.error_count, 1);
    }

    #[test]
    fn test_record_unknown_row() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        let err = store.record_interpretation(&id, 9, &ok(1), false).unwrap_err();
        assert!(matches!(err, StoreError::RowNotFound { row_id: 9, .. }));
    }

    #[test]
    fn test_record_rejected_after_cancel() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();
        store.cancel_session(&id).unwrap();
        let err = store.record_interpretation(&id, 1, &ok(1), false).unwrap_err();
        assert!(matches!(err, StoreError::SessionCanceled(_)));
    }

    #[test]
    fn test_session_siblings() {
        let store = store();
        let id = store.start_session("/data", true, "local").unwrap().id;
        store.append_rows(&id, &files()).unwrap();
        let siblings = SessionSiblings::new(&store, &id);
        assert!(siblings.has_sibling("/data", "b.csv"));
        assert!(!siblings.has_sibling("/data", "c.md"));
        assert!(siblings.has_sibling("/data/sub", "c.md"));
    }
}
