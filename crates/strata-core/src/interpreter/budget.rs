//! Cooperative time budgets and cancellation.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::traits::InterpretError;
use crate::models::ErrorKind;

/// Soft cancellation flag shared between a session and its queued work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Deadline + cancellation handed to an interpreter.
///
/// Interpreters that loop over input call [`Budget::check`] periodically so
/// that abandoned or cancelled work stops early.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Option<Instant>,
    cancel: CancelToken,
    state: Arc<AtomicU8>,
}

impl Budget {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancel,
            state: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    /// No deadline and no cancellation. For direct calls outside the engine.
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancel: CancelToken::new(),
            state: Arc::new(AtomicU8::new(RUNNING)),
        }
    }

    /// Fail fast when the deadline passed, the caller gave up, or the session
    /// was cancelled.
    pub fn check(&self) -> Result<(), InterpretError> {
        if self.cancel.is_canceled() {
            return Err(InterpretError::new(ErrorKind::Canceled, "session was canceled"));
        }
        if self.state.load(Ordering::SeqCst) == ABANDONED {
            return Err(InterpretError::new(ErrorKind::Timeout, "worker was abandoned"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(InterpretError::new(ErrorKind::Timeout, "time budget exhausted"));
        }
        Ok(())
    }

    /// Marks the work abandoned. Returns false if the worker already finished.
    pub(crate) fn abandon(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Marks the work finished. Returns false if it had been abandoned first.
    pub(crate) fn finish(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, FINISHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_budget_passes() {
        assert!(Budget::unbounded().check().is_ok());
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let budget = Budget::new(Duration::ZERO, CancelToken::new());
        let err = budget.check().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_cancel_wins_over_deadline() {
        let cancel = CancelToken::new();
        let budget = Budget::new(Duration::from_secs(60), cancel.clone());
        cancel.cancel();
        assert_eq!(budget.check().unwrap_err().kind, ErrorKind::Canceled);
    }

    #[test]
    fn test_abandon_and_finish_are_exclusive() {
        let budget = Budget::new(Duration::from_secs(60), CancelToken::new());
        assert!(budget.abandon());
        assert!(!budget.finish());
        assert_eq!(budget.check().unwrap_err().kind, ErrorKind::Timeout);

        let budget = Budget::new(Duration::from_secs(60), CancelToken::new());
        assert!(budget.finish());
        assert!(!budget.abandon());
    }
}
