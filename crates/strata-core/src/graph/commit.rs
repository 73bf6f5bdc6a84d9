//! Projection of scan rows into the graph, and verification.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    GraphBackend, GraphError, NodeRef, Props, RetryPolicy, CONTAINS, FILE_LABEL, FOLDER_LABEL,
    SCANNED_IN, SCAN_LABEL,
};
use crate::config::GraphConfig;
use crate::locks::SessionLocks;
use crate::models::{
    GraphCommitRecord, ProjectionState, ScanRow, ScanSession, VerificationReport,
};
use crate::store::ScanStore;

/// Verification entry for rows not projected at their current revision.
pub const PENDING_ROWS: &str = "pending_rows";

/// Which rows a commit projects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Rows not yet projected at their current revision: rows past the
    /// high-water mark, and rows interpreted since they were projected.
    #[default]
    Incremental,
    /// Every row of the session.
    Full,
}

/// What one commit did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub session_id: String,
    pub mode: CommitMode,
    pub rows_projected: u64,
    pub nodes_upserted: u64,
    pub relationships_upserted: u64,
    pub high_water_row_id: i64,
    pub state: ProjectionState,
}

/// Projects sessions from the store into a graph backend.
pub struct GraphCommitter {
    backend: Arc<dyn GraphBackend>,
    store: Arc<ScanStore>,
    policy: RetryPolicy,
    page_size: usize,
    locks: SessionLocks,
}

impl GraphCommitter {
    pub fn new(backend: Arc<dyn GraphBackend>, store: Arc<ScanStore>, config: &GraphConfig) -> Self {
        Self {
            backend,
            store,
            policy: RetryPolicy::from_config(config),
            page_size: config.page_size.max(1),
            locks: SessionLocks::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend(&self) -> &Arc<dyn GraphBackend> {
        &self.backend
    }

    /// Project a session's rows into the graph.
    ///
    /// Progress is saved after every page, so a failed commit resumes where
    /// it stopped. Re-projecting rows is harmless: every upsert is keyed.
    pub async fn commit(
        &self,
        session_id: &str,
        mode: CommitMode,
    ) -> Result<CommitSummary, GraphError> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().await;

        let session = self.session(session_id)?;
        self.ensure_healthy().await?;

        let mut record = self.store.commit_record_or_new(session_id)?;
        let mut cursor = 0;

        let mut summary = CommitSummary {
            session_id: session_id.to_string(),
            mode,
            rows_projected: 0,
            nodes_upserted: 0,
            relationships_upserted: 0,
            high_water_row_id: record.high_water_row_id,
            state: record.state,
        };

        let scan = NodeRef::new(SCAN_LABEL, session_id);
        self.upsert_node(&scan, scan_props(&session)).await?;
        summary.nodes_upserted += 1;

        let mut folders: HashSet<String> = HashSet::new();
        loop {
            let rows = match mode {
                CommitMode::Incremental => {
                    self.store
                        .unprojected_rows(session_id, cursor, self.page_size)?
                }
                CommitMode::Full => self.store.rows_after(session_id, cursor, self.page_size)?,
            };
            let Some(last) = rows.last().map(|r| r.row_id) else {
                break;
            };

            for row in &rows {
                let dir = row.descriptor.parent_dir();
                let folder = NodeRef::new(FOLDER_LABEL, format!("{}:{}", session_id, dir));
                if folders.insert(dir.clone()) {
                    self.upsert_node(&folder, folder_props(session_id, &dir))
                        .await?;
                    summary.nodes_upserted += 1;
                }

                let file = NodeRef::new(
                    FILE_LABEL,
                    format!("{}:{}", session_id, row.descriptor.path),
                );
                self.upsert_node(&file, file_props(row)).await?;
                self.upsert_relationship(CONTAINS, &folder, &file, session_id)
                    .await?;
                self.upsert_relationship(SCANNED_IN, &file, &scan, session_id)
                    .await?;
                summary.nodes_upserted += 1;
                summary.relationships_upserted += 2;
            }

            self.store.mark_projected(session_id, &rows)?;
            summary.rows_projected += rows.len() as u64;
            cursor = last;
            record.high_water_row_id = record.high_water_row_id.max(last);
            record.state = ProjectionState::Committed;
            self.store.save_commit_record(&record)?;
        }

        if record.state == ProjectionState::NotCommitted {
            record.state = ProjectionState::Committed;
        }
        record.nodes_upserted = summary.nodes_upserted;
        record.relationships_upserted = summary.relationships_upserted;
        record.committed_at = Some(Utc::now());
        self.store.save_commit_record(&record)?;

        summary.high_water_row_id = record.high_water_row_id;
        summary.state = record.state;
        info!(
            "Committed session {} ({:?}): {} rows, {} nodes, {} relationships",
            session_id,
            mode,
            summary.rows_projected,
            summary.nodes_upserted,
            summary.relationships_upserted
        );
        Ok(summary)
    }

    /// Compare the counts the store implies with what the graph holds.
    ///
    /// Discrepancies are reported in the returned report and never raised.
    pub async fn verify(&self, session_id: &str) -> Result<VerificationReport, GraphError> {
        let lock = self.locks.get(session_id);
        let _guard = lock.lock().await;

        self.session(session_id)?;
        self.ensure_healthy().await?;

        let (paths, folders) = self.store.distinct_counts(session_id)?;
        let mut expected = BTreeMap::from([
            (SCAN_LABEL.to_string(), 1),
            (FOLDER_LABEL.to_string(), folders),
            (FILE_LABEL.to_string(), paths),
            (CONTAINS.to_string(), paths),
            (SCANNED_IN.to_string(), paths),
        ]);

        let mut observed = BTreeMap::new();
        for name in expected.keys() {
            let count = self
                .policy
                .run("count_in_scan", || self.backend.count_in_scan(name, session_id))
                .await?;
            observed.insert(name.clone(), count);
        }
        // Rows whose latest interpretation has not reached the graph.
        expected.insert(PENDING_ROWS.to_string(), 0);
        observed.insert(
            PENDING_ROWS.to_string(),
            self.store.unprojected_count(session_id)?,
        );

        let report = VerificationReport::compare(session_id, expected, observed);
        for d in &report.discrepancies {
            warn!(
                "Session {}: expected {} {} in graph, found {}",
                session_id, d.expected, d.name, d.observed
            );
        }

        let mut record = self.store.commit_record_or_new(session_id)?;
        record.verified_at = Some(report.verified_at);
        if report.is_consistent() && record.state == ProjectionState::Committed {
            record.state = ProjectionState::Verified;
        }
        record.last_verification = Some(report.clone());
        self.store.save_commit_record(&record)?;

        info!(
            "Verified session {}: {} discrepancies",
            session_id,
            report.discrepancies.len()
        );
        Ok(report)
    }

    /// The session's commit record, if it was ever committed or verified.
    pub fn record(&self, session_id: &str) -> Result<Option<GraphCommitRecord>, GraphError> {
        Ok(self.store.get_commit_record(session_id)?)
    }

    fn session(&self, session_id: &str) -> Result<ScanSession, GraphError> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))
    }

    async fn ensure_healthy(&self) -> Result<(), GraphError> {
        let healthy = tokio::time::timeout(self.policy.timeout, self.backend.health())
            .await
            .unwrap_or(false);
        if healthy {
            Ok(())
        } else {
            Err(GraphError::Unavailable(format!(
                "{} backend failed its health check",
                self.backend.name()
            )))
        }
    }

    async fn upsert_node(&self, node: &NodeRef, props: Props) -> Result<(), GraphError> {
        self.policy
            .run("upsert_node", || {
                self.backend
                    .upsert_node(&node.label, &node.key, props.clone())
            })
            .await
    }

    async fn upsert_relationship(
        &self,
        rel_type: &str,
        from: &NodeRef,
        to: &NodeRef,
        scan_id: &str,
    ) -> Result<(), GraphError> {
        let mut props = Props::new();
        props.insert("scan_id".to_string(), json!(scan_id));
        self.policy
            .run("upsert_relationship", || {
                self.backend
                    .upsert_relationship(rel_type, from, to, props.clone())
            })
            .await
    }
}

fn scan_props(session: &ScanSession) -> Props {
    let mut props = Props::new();
    props.insert("scan_id".to_string(), json!(session.id));
    props.insert("root".to_string(), json!(session.root));
    props.insert("recursive".to_string(), json!(session.recursive));
    props.insert("provider_id".to_string(), json!(session.provider_id));
    props.insert("status".to_string(), json!(session.status));
    props.insert("started_at".to_string(), json!(session.started_at.to_rfc3339()));
    props
}

fn folder_props(scan_id: &str, dir: &str) -> Props {
    let mut props = Props::new();
    props.insert("scan_id".to_string(), json!(scan_id));
    props.insert("path".to_string(), json!(dir));
    props
}

fn file_props(row: &ScanRow) -> Props {
    let fd = &row.descriptor;
    let mut props = Props::new();
    props.insert("scan_id".to_string(), json!(row.session_id));
    props.insert("row_id".to_string(), json!(row.row_id));
    props.insert("path".to_string(), json!(fd.path));
    props.insert("name".to_string(), json!(fd.file_name()));
    props.insert("extension".to_string(), json!(fd.extension));
    props.insert("size".to_string(), json!(fd.size));
    props.insert("modified".to_string(), json!(fd.modified));
    props.insert("checksum".to_string(), json!(fd.checksum));
    if let Some(result) = &row.interpretation {
        props.insert("interpreter_id".to_string(), json!(result.interpreter_id));
        props.insert("interpretation_status".to_string(), json!(result.status));
        props.insert("metadata".to_string(), json!(result.data));
    }
    props
}
