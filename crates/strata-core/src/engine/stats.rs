//! Engine counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Interpretations that produced a result from the interpreter itself.
    pub completed: u64,
    pub timed_out: u64,
    /// Timed-out workers still running in the background.
    pub abandoned: u64,
    /// Requests refused with `BACKPRESSURE`.
    pub rejected: u64,
    /// Admitted requests, running or waiting for a slot.
    pub in_flight: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub completed: AtomicU64,
    pub timed_out: AtomicU64,
    pub abandoned: AtomicU64,
    pub rejected: AtomicU64,
    pub in_flight: AtomicUsize,
}

impl Counters {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    /// Reserve an in-flight slot unless `capacity` is already reached.
    pub fn admit(&self, capacity: usize) -> bool {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
