//! Strata core: scan filesystems, interpret files within bounded budgets,
//! and project the results into a relational index and a property graph.
//!
//! The usual entry point is [`PipelineContext`], which owns one of each
//! component below.

pub mod config;
pub mod engine;
pub mod enumerate;
pub mod graph;
pub mod interpreter;
pub mod locks;
pub mod models;
pub mod pipeline;
pub mod store;

pub use config::Config;
pub use engine::{EngineStats, ExecutionEngine};
pub use enumerate::{EnumerateError, Enumerator, LocalEnumerator, ScanTarget};
pub use graph::{CommitMode, CommitSummary, GraphBackend, GraphCommitter, GraphError};
pub use interpreter::{
    CancelToken, Interpreter, InterpreterDefinition, InterpreterRegistry, RegistryError,
    SelectionRule,
};
pub use models::{
    ErrorKind, FileDescriptor, InterpretationResult, ResultStatus, ScanRow, ScanSession,
    SessionStatus, VerificationReport,
};
pub use pipeline::{PipelineContext, PipelineError, ScanReport, ScanRequest, SessionReport};
pub use store::{ChunkOutcome, ChunkRequest, ScanStore, StoreError};
