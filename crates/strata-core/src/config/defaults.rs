//! Default values for Strata configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Engine Defaults
// ============================================================================

/// Maximum interpretations running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Maximum interpretations waiting for a worker slot before new work is rejected.
pub const DEFAULT_MAX_QUEUE: usize = 64;

/// Wall-clock budget for one interpretation (30 s).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Size guard applied when an interpreter sets no limit of its own (100 MB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Hard cap on the serialized `data` payload of a result (64 KB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

// ============================================================================
// Chunk Defaults
// ============================================================================

/// Rows examined by one `interpret_chunk` call when the caller gives no size.
pub const DEFAULT_CHUNK_MAX_FILES: usize = 500;

/// Upper clamp for `max_files`. Remote providers rate-limit, so keep this modest.
pub const DEFAULT_CHUNK_MAX_FILES_CEILING: usize = 2000;

/// Descriptors appended to the store per transaction during enumeration.
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 256;

// ============================================================================
// Storage Defaults
// ============================================================================

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = ".strata";

/// Default SQLite file name inside the data directory.
pub const DEFAULT_DB_FILE: &str = "scans.db";

// ============================================================================
// Graph Defaults
// ============================================================================

/// Default graph backend ("surreal" or "memory").
pub const DEFAULT_GRAPH_BACKEND: &str = "surreal";

/// Default graph directory inside the data directory.
pub const DEFAULT_GRAPH_DIR: &str = "graph";

/// Timeout for a single graph backend call.
pub const DEFAULT_GRAPH_CALL_TIMEOUT_MS: u64 = 10_000;

/// Retries after the first failed graph call.
pub const DEFAULT_GRAPH_MAX_RETRIES: u32 = 3;

/// Initial backoff between graph retries; doubles each attempt.
pub const DEFAULT_GRAPH_BACKOFF_MS: u64 = 200;

/// Rows read from the store per commit page.
pub const DEFAULT_GRAPH_PAGE_SIZE: usize = 500;

// ============================================================================
// Interpreter Defaults
// ============================================================================

/// Markdown headings kept by the notebook interpreter.
pub const NOTEBOOK_MAX_HEADINGS: usize = 5;

/// Import tokens kept by the notebook interpreter.
pub const NOTEBOOK_MAX_IMPORTS: usize = 50;

/// Per-interpreter size guard for notebooks (1 MB unless raised by config).
pub const NOTEBOOK_MAX_SIZE_BYTES: u64 = 1024 * 1024;

/// Bytes read by the Python interpreter.
pub const PYTHON_MAX_READ_BYTES: usize = 2 * 1024 * 1024;

/// Rows sampled by the tabular interpreter.
pub const TABULAR_MAX_ROWS: usize = 10_000;

/// Bytes read by the structured-config interpreter.
pub const STRUCTURED_MAX_READ_BYTES: usize = 1024 * 1024;

/// Lines read by the plain-text interpreter.
pub const TEXT_MAX_LINES: usize = 5_000;

/// Bytes of one line read by the plain-text interpreter; the rest of a
/// longer line is skipped.
pub const TEXT_MAX_LINE_BYTES: usize = 64 * 1024;
