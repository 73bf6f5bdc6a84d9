//! Enumeration error types.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The provider asked us to slow down.
    #[error("Rate limited by provider{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EnumerateError {
    /// Rate limits and transient failures are worth retrying; missing targets
    /// and permission problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            Self::NotFound(_) | Self::PermissionDenied(_) => false,
        }
    }
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    retry_after_ms
        .map(|ms| format!(" (retry after {} ms)", ms))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EnumerateError::RateLimited { retry_after_ms: Some(10) }.is_retryable());
        assert!(EnumerateError::Transient("flaky".into()).is_retryable());
        assert!(!EnumerateError::NotFound("/x".into()).is_retryable());
        assert!(!EnumerateError::PermissionDenied("/x".into()).is_retryable());
        assert!(EnumerateError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
        assert!(!EnumerateError::Io(io::Error::from(io::ErrorKind::Other)).is_retryable());
    }

    #[test]
    fn test_rate_limit_message() {
        let err = EnumerateError::RateLimited { retry_after_ms: Some(250) };
        assert_eq!(err.to_string(), "Rate limited by provider (retry after 250 ms)");
    }
}
