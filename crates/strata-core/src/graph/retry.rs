//! Timeouts and exponential backoff for graph calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::GraphError;
use crate::config::GraphConfig;

/// How one backend call is bounded and retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.call_timeout_ms),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Run `call`, bounding each attempt by `timeout`.
    ///
    /// Retryable failures are retried up to `max_retries` times, sleeping
    /// `backoff * 2^attempt` in between. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, GraphError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GraphError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => GraphError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
            warn!(
                "Graph call '{}' failed (attempt {}): {}; retrying in {:?}",
                operation,
                attempt + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GraphConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries: retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let value = policy(3)
            .run("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GraphError::Backend("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let err = policy(2)
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GraphError::Backend("down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Backend(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = &AtomicU32::new(0);
        let err = policy(5)
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GraphError::SessionNotFound("s".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::SessionNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let err = policy(1)
            .run("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Timeout { timeout_ms: 50, .. }));
    }
}
