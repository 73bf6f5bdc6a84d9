//! Store error types.

use thiserror::Error;

use crate::interpreter::RegistryError;
use crate::models::SessionStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scan session not found: {0}")]
    SessionNotFound(String),

    #[error("Scan session {id} is {status}, not running")]
    SessionNotRunning { id: String, status: SessionStatus },

    #[error("Scan session {0} was canceled")]
    SessionCanceled(String),

    #[error("Row {row_id} not found in session {session_id}")]
    RowNotFound { session_id: String, row_id: i64 },

    /// A different result is already recorded and `overwrite` was not set.
    #[error("Row {row_id} in session {session_id} is already interpreted")]
    AlreadyInterpreted { session_id: String, row_id: i64 },

    #[error("Cannot finish session {id} with status {status}")]
    InvalidTransition { id: String, status: SessionStatus },

    #[error("Invalid filter pattern '{pattern}': {message}")]
    InvalidFilter { pattern: String, message: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
