//! The scan → interpret → commit → verify pipeline.
//!
//! [`PipelineContext`] owns every long-lived component: registry, engine,
//! store, graph committer and enumerator. Nothing is global; a process may
//! hold several contexts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, RuleConfig};
use crate::engine::{EngineStats, ExecutionEngine};
use crate::enumerate::{
    stream_batches, EnumerateError, EnumerationEvent, Enumerator, LocalEnumerator, ScanTarget,
};
use crate::graph::{
    open_backend, CommitMode, CommitSummary, GraphBackend, GraphCommitter, GraphError,
    MemoryGraph,
};
use crate::interpreter::builtin::register_defaults;
use crate::interpreter::{CancelToken, InterpreterRegistry, RegistryError, SelectionRule};
use crate::models::{GraphCommitRecord, ScanSession, SessionStatus, VerificationReport};
use crate::store::{ChunkOutcome, ChunkRequest, ScanStore, StoreError};

/// Errors raised by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Enumeration error: {0}")]
    Enumerate(#[from] EnumerateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// The named session (or scan root) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::SessionNotFound(_))
                | Self::Store(StoreError::RowNotFound { .. })
                | Self::Graph(GraphError::SessionNotFound(_))
                | Self::Graph(GraphError::Store(StoreError::SessionNotFound(_)))
                | Self::Enumerate(EnumerateError::NotFound(_))
        )
    }

    /// The request conflicts with the session's state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::SessionNotRunning { .. })
                | Self::Store(StoreError::SessionCanceled(_))
                | Self::Store(StoreError::AlreadyInterpreted { .. })
                | Self::Store(StoreError::InvalidTransition { .. })
        )
    }

    /// A dependency is temporarily unavailable; the caller may retry.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Graph(e) => e.is_retryable(),
            Self::Enumerate(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The request itself was malformed.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::Store(StoreError::InvalidFilter { .. }))
    }
}

/// What to scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub root: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Interpret every row once enumeration finishes.
    #[serde(default)]
    pub interpret: bool,
}

fn default_true() -> bool {
    true
}

impl ScanRequest {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            interpret: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn interpret(mut self, interpret: bool) -> Self {
        self.interpret = interpret;
        self
    }
}

/// Result of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub session: ScanSession,
    /// Descriptors the enumerator produced.
    pub files_enumerated: u64,
    /// Rows that did not exist in the session before this scan.
    pub new_rows: u64,
    /// Entries the enumerator could not describe.
    pub skipped_entries: u64,
    pub interpretation: Option<ChunkOutcome>,
}

/// Everything known about one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: ScanSession,
    pub row_count: u64,
    pub graph: Option<GraphCommitRecord>,
    pub engine: EngineStats,
}

/// Owns the pipeline's components and runs its operations.
pub struct PipelineContext {
    config: Config,
    registry: Arc<InterpreterRegistry>,
    engine: Arc<ExecutionEngine>,
    store: Arc<ScanStore>,
    committer: Arc<GraphCommitter>,
    enumerator: Arc<dyn Enumerator>,
    cancels: Mutex<HashMap<String, CancelToken>>,
}

impl PipelineContext {
    /// Assemble a context from parts. Fails when a selection rule targets
    /// an interpreter that is not registered.
    pub fn new(
        config: Config,
        registry: Arc<InterpreterRegistry>,
        store: Arc<ScanStore>,
        backend: Arc<dyn GraphBackend>,
        enumerator: Arc<dyn Enumerator>,
    ) -> Result<Self, PipelineError> {
        registry.validate()?;
        let engine = Arc::new(ExecutionEngine::new(config.engine.clone()));
        let committer = Arc::new(GraphCommitter::new(backend, store.clone(), &config.graph));

        Ok(Self {
            config,
            registry,
            engine,
            store,
            committer,
            enumerator,
            cancels: Mutex::new(HashMap::new()),
        })
    }

    /// Open the on-disk store and configured graph backend, with the
    /// built-in interpreters, the configured rules and the local enumerator.
    pub async fn open(config: Config) -> Result<Self, PipelineError> {
        let store = Arc::new(ScanStore::open(
            config.storage.db_path(),
            config.chunk.clone(),
        )?);
        let backend = open_backend(&config.graph, &config.storage).await?;
        let registry = default_registry(&config)?;
        Self::new(
            config,
            registry,
            store,
            backend,
            Arc::new(LocalEnumerator::new()),
        )
    }

    /// In-memory store and graph; nothing is persisted.
    pub fn in_memory(config: Config) -> Result<Self, PipelineError> {
        let store = Arc::new(ScanStore::open_in_memory(config.chunk.clone())?);
        let registry = default_registry(&config)?;
        Self::new(
            config,
            registry,
            store,
            Arc::new(MemoryGraph::new()),
            Arc::new(LocalEnumerator::new()),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<InterpreterRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<ScanStore> {
        &self.store
    }

    pub fn committer(&self) -> &Arc<GraphCommitter> {
        &self.committer
    }

    /// Enumerate `request.root` into a session, appending rows as batches
    /// arrive, then optionally interpret them.
    ///
    /// Every scan is a new session. Files an earlier completed scan of the
    /// same target already recorded are deduplicated against it, so an
    /// unchanged rescan adds no rows.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanReport, PipelineError> {
        let root = canonical_root(&request.root);
        let session = self.store.start_session(
            &root,
            request.recursive,
            self.enumerator.provider_id(),
        )?;
        let session_id = session.id.clone();
        let cancel = self.fresh_token(&session_id);

        let (mut rx, handle) = stream_batches(
            self.enumerator.clone(),
            ScanTarget::new(&root, request.recursive),
            self.config.chunk.ingest_batch_size,
            cancel.clone(),
        );

        let mut files_enumerated = 0u64;
        let mut skipped_entries = 0u64;
        let mut new_rows = 0u64;
        while let Some(event) = rx.recv().await {
            match event {
                EnumerationEvent::Batch(batch) => {
                    files_enumerated += batch.len() as u64;
                    match self.store.append_rows(&session_id, &batch) {
                        Ok(appended) => {
                            new_rows += appended.iter().filter(|a| a.is_new()).count() as u64;
                        }
                        // Canceled here or by another process sharing the store.
                        Err(StoreError::SessionNotRunning {
                            status: SessionStatus::Canceled,
                            ..
                        }) => {
                            cancel.cancel();
                            break;
                        }
                        Err(e) => {
                            cancel.cancel();
                            self.fail(&session_id);
                            return Err(e.into());
                        }
                    }
                }
                EnumerationEvent::Skipped(_) => skipped_entries += 1,
            }
        }
        drop(rx);

        let walked = handle
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?;
        if let Err(e) = walked {
            self.fail(&session_id);
            return Err(e.into());
        }

        info!(
            "Scan of {} enumerated {} files ({} new rows, {} skipped)",
            root, files_enumerated, new_rows, skipped_entries
        );

        let interpretation = if request.interpret && !cancel.is_canceled() {
            match self.interpret_all(&session_id, &ChunkRequest::default()).await {
                Ok(outcome) => Some(outcome),
                Err(PipelineError::Store(StoreError::SessionCanceled(_))) => None,
                Err(e) => {
                    self.fail(&session_id);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let session = self
            .store
            .finish_session(&session_id, SessionStatus::Completed)?;
        Ok(ScanReport {
            session,
            files_enumerated,
            new_rows,
            skipped_entries,
            interpretation,
        })
    }

    /// Interpret one chunk of a session's rows.
    pub async fn interpret(
        &self,
        session_id: &str,
        request: &ChunkRequest,
    ) -> Result<ChunkOutcome, PipelineError> {
        let cancel = self.token(session_id);
        Ok(self
            .store
            .interpret_chunk(session_id, request, &self.registry, &self.engine, &cancel)
            .await?)
    }

    /// Follow the cursor from `request.after_rowid` to the end of the
    /// session, summing every chunk.
    pub async fn interpret_all(
        &self,
        session_id: &str,
        request: &ChunkRequest,
    ) -> Result<ChunkOutcome, PipelineError> {
        let mut request = request.clone();
        let mut total = ChunkOutcome::default();
        loop {
            let outcome = self.interpret(session_id, &request).await?;
            let cursor = outcome.next_cursor;
            total.absorb(outcome);
            match cursor {
                Some(next) if !self.token(session_id).is_canceled() => {
                    request.after_rowid = Some(next)
                }
                _ => return Ok(total),
            }
        }
    }

    pub async fn commit(
        &self,
        session_id: &str,
        mode: CommitMode,
    ) -> Result<CommitSummary, PipelineError> {
        Ok(self.committer.commit(session_id, mode).await?)
    }

    pub async fn verify(&self, session_id: &str) -> Result<VerificationReport, PipelineError> {
        Ok(self.committer.verify(session_id).await?)
    }

    /// Commit, then verify.
    pub async fn commit_and_verify(
        &self,
        session_id: &str,
        mode: CommitMode,
    ) -> Result<(CommitSummary, VerificationReport), PipelineError> {
        let summary = self.commit(session_id, mode).await?;
        let report = self.verify(session_id).await?;
        Ok((summary, report))
    }

    pub fn status(&self, session_id: &str) -> Result<SessionReport, PipelineError> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionReport {
            row_count: self.store.row_count(session_id)?,
            graph: self.store.get_commit_record(session_id)?,
            engine: self.engine.stats(),
            session,
        })
    }

    /// Mark the session canceled and stop its outstanding work. Results
    /// that complete afterwards are discarded.
    ///
    /// Canceling a finished session changes nothing.
    pub fn cancel(&self, session_id: &str) -> Result<ScanSession, PipelineError> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        if session.status.is_terminal() {
            return Ok(session);
        }
        self.token(session_id).cancel();
        let session = self.store.cancel_session(session_id)?;
        info!("Canceled session {}", session_id);
        Ok(session)
    }

    pub fn sessions(&self, limit: usize) -> Result<Vec<ScanSession>, PipelineError> {
        Ok(self.store.list_sessions(limit)?)
    }

    fn token(&self, session_id: &str) -> CancelToken {
        let mut cancels = self.cancels.lock().unwrap_or_else(|p| p.into_inner());
        cancels.entry(session_id.to_string()).or_default().clone()
    }

    /// Replace the session's token; a reopened session starts uncanceled.
    fn fresh_token(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        let mut cancels = self.cancels.lock().unwrap_or_else(|p| p.into_inner());
        cancels.insert(session_id.to_string(), token.clone());
        token
    }

    fn fail(&self, session_id: &str) {
        if let Err(e) = self.store.finish_session(session_id, SessionStatus::Failed) {
            warn!("Could not mark session {} failed: {}", session_id, e);
        }
    }
}

/// Built-in interpreters plus the rules from `config.rules`.
pub fn default_registry(config: &Config) -> Result<Arc<InterpreterRegistry>, PipelineError> {
    let registry = Arc::new(InterpreterRegistry::new());
    register_defaults(&registry)?;
    for rule in &config.rules {
        registry.add_rule(selection_rule(rule)?)?;
    }
    Ok(registry)
}

fn selection_rule(config: &RuleConfig) -> Result<SelectionRule, RegistryError> {
    let mut rule = SelectionRule::new(&config.id, config.priority, &config.target);
    if let Some(pattern) = &config.path_regex {
        rule = rule.path_regex(pattern)?;
    }
    if let Some(name) = &config.sibling {
        rule = rule.sibling(name);
    }
    if let Some(bytes) = config.min_size {
        rule = rule.min_size(bytes);
    }
    if let Some(ext) = &config.extension {
        rule = rule.extension(ext);
    }
    for (key, value) in &config.config {
        rule = rule.config(key, value.clone());
    }
    Ok(rule)
}

fn canonical_root(root: &str) -> String {
    std::fs::canonicalize(Path::new(root))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| root.to_string())
}
