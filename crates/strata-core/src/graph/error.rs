//! Graph error types.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum GraphError {
    /// The backend failed its health check. Retry later.
    #[error("Graph backend unavailable: {0}")]
    Unavailable(String),

    #[error("Graph call '{operation}' timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Graph backend error: {0}")]
    Backend(String),

    #[error("Unknown graph backend '{0}'")]
    UnknownBackend(String),

    #[error("Scan session not found: {0}")]
    SessionNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl GraphError {
    /// Whether the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout { .. } | Self::Backend(_)
        )
    }
}

impl From<surrealdb::Error> for GraphError {
    fn from(err: surrealdb::Error) -> Self {
        GraphError::Backend(err.to_string())
    }
}
