//! Lightweight dispatch counters.
//!
//! Diagnostic only: nothing in the dispatch path reads these to make
//! decisions.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time snapshot of a queue's or pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Submissions accepted into the backlog.
    pub submitted: usize,
    /// Tasks handed to an execution context.
    pub dispatched: usize,
    /// Tasks that ran to completion.
    pub completed: usize,
    /// Tasks that failed (handled, rethrown, or collected).
    pub failed: usize,
    /// Worker slots replaced after a failure (pools only).
    pub workers_replaced: usize,
}

pub(crate) struct Counters {
    submitted: AtomicUsize,
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    workers_replaced: AtomicUsize,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self {
            submitted: AtomicUsize::new(0),
            dispatched: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            workers_replaced: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_replaced(&self) {
        self.workers_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            workers_replaced: self.workers_replaced.load(Ordering::Relaxed),
        }
    }
}
