//! Chunked, cursor-based interpretation of a session's rows.

use futures::stream::{self, StreamExt};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::rows::SessionSiblings;
use super::sessions::require_session;
use super::{ScanStore, StoreError};
use crate::engine::ExecutionEngine;
use crate::interpreter::{CancelToken, InterpreterRegistry};
use crate::models::SessionStatus;

/// One chunk of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkRequest {
    /// Start after this row id; `None` starts at the beginning.
    pub after_rowid: Option<i64>,
    /// Rows examined; clamped to `[1, chunk.max_files_ceiling]`.
    pub max_files: Option<usize>,
    /// Globs over the full path; when non-empty a row must match one.
    pub include: Vec<String>,
    /// Globs over the full path; a matching row is skipped.
    pub exclude: Vec<String>,
    /// Rows larger than this are skipped without running an interpreter.
    pub max_size_bytes: Option<u64>,
    /// Re-run rows that already carry a result.
    pub overwrite: bool,
}

/// What one chunk did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    /// Rows the engine ran on and whose result was recorded.
    pub processed_count: u64,
    pub error_count: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub filtered_by_size: u64,
    /// Rows dropped by the include or exclude globs.
    pub filtered_by_include: u64,
    /// Rows no interpreter claims.
    pub uninterpreted: u64,
    pub skipped_existing: u64,
    /// Results thrown away because the session was canceled mid-chunk.
    pub discarded: u64,
    /// Last examined row id; `None` when no rows remain after it.
    pub next_cursor: Option<i64>,
}

impl ChunkOutcome {
    /// Fold a later chunk into this running total; the cursor is taken
    /// from `next`.
    pub fn absorb(&mut self, next: ChunkOutcome) {
        self.processed_count += next.processed_count;
        self.error_count += next.error_count;
        for (kind, n) in next.errors_by_kind {
            *self.errors_by_kind.entry(kind).or_default() += n;
        }
        self.filtered_by_size += next.filtered_by_size;
        self.filtered_by_include += next.filtered_by_include;
        self.uninterpreted += next.uninterpreted;
        self.skipped_existing += next.skipped_existing;
        self.discarded += next.discarded;
        self.next_cursor = next.next_cursor;
    }
}

struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    fn compile(request: &ChunkRequest) -> Result<Self, StoreError> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>, StoreError> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| StoreError::InvalidFilter {
                        pattern: p.clone(),
                        message: e.msg.to_string(),
                    })
                })
                .collect()
        };
        Ok(Self {
            include: compile(&request.include)?,
            exclude: compile(&request.exclude)?,
        })
    }

    fn admits(&self, path: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(path));
        included && !self.exclude.iter().any(|p| p.matches(path))
    }
}

impl ScanStore {
    /// Interpret the next chunk of rows after `request.after_rowid`.
    ///
    /// Rows are filtered, resolved against `registry`, then run on `engine`
    /// concurrently; results are matched back by row id and recorded as
    /// they arrive. Chunks for the same session never interleave.
    pub async fn interpret_chunk(
        &self,
        session_id: &str,
        request: &ChunkRequest,
        registry: &InterpreterRegistry,
        engine: &ExecutionEngine,
        cancel: &CancelToken,
    ) -> Result<ChunkOutcome, StoreError> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().await;

        let session = require_session(&self.conn(), session_id)?;
        if session.status == SessionStatus::Canceled {
            return Err(StoreError::SessionCanceled(session_id.to_string()));
        }

        let filter = PathFilter::compile(request)?;
        let limit = self.chunk.clamp(request.max_files);
        let rows = self.rows_after(session_id, request.after_rowid.unwrap_or(0), limit)?;

        let mut outcome = ChunkOutcome::default();
        let Some(last_row_id) = rows.last().map(|r| r.row_id) else {
            return Ok(outcome);
        };

        let mut jobs = Vec::new();
        {
            let siblings = SessionSiblings::new(self, session_id);
            for row in rows {
                let fd = &row.descriptor;
                if !filter.admits(&fd.path) {
                    outcome.filtered_by_include += 1;
                    continue;
                }
                if request.max_size_bytes.is_some_and(|max| fd.size > max) {
                    outcome.filtered_by_size += 1;
                    continue;
                }
                if row.interpretation.is_some() && !request.overwrite {
                    outcome.skipped_existing += 1;
                    continue;
                }
                match registry.resolve_with(fd, &siblings)? {
                    Some(resolution) => jobs.push((row, resolution)),
                    None => outcome.uninterpreted += 1,
                }
            }
        }

        debug!(
            "Chunk of session {} after {:?}: {} rows to interpret",
            session_id,
            request.after_rowid,
            jobs.len()
        );

        let mut results = stream::iter(jobs)
            .map(|(row, resolution)| async move {
                let result = engine.run(&row.descriptor, &resolution, cancel).await;
                (row.row_id, result)
            })
            .buffer_unordered(engine.max_concurrent());

        while let Some((row_id, result)) = results.next().await {
            if cancel.is_canceled() {
                outcome.discarded += 1;
                continue;
            }
            match self.record_interpretation(session_id, row_id, &result, true) {
                Ok(()) => outcome.processed_count += 1,
                Err(StoreError::SessionCanceled(_)) => {
                    outcome.discarded += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Some(kind) = result.error_kind() {
                outcome.error_count += 1;
                *outcome
                    .errors_by_kind
                    .entry(kind.as_str().to_string())
                    .or_default() += 1;
            }
        }

        if self.has_rows_after(session_id, last_row_id)? {
            outcome.next_cursor = Some(last_row_id);
        }

        info!(
            "Session {}: processed {} rows ({} errors), cursor {:?}",
            session_id, outcome.processed_count, outcome.error_count, outcome.next_cursor
        );
        Ok(outcome)
    }
}
