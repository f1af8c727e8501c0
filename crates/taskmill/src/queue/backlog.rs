//! The pending-task queue shared by submitters and a dispatcher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::task::Task;

/// FIFO backlog of submitted tasks.
///
/// Submitters append, the dispatcher pops from the front; insertion
/// order is dispatch order. The lock is held only for the brief
/// append/pop, never across task execution. The `blocked` flag gates
/// new submissions without touching what is already queued.
pub(crate) struct Backlog {
    tasks: Mutex<VecDeque<Task>>,
    blocked: AtomicBool,
}

impl Backlog {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            blocked: AtomicBool::new(false),
        }
    }

    /// Appends a task; returns `false` without queueing when blocked.
    pub(crate) fn push(&self, task: Task) -> bool {
        if self.blocked.load(Ordering::Acquire) {
            return false;
        }
        self.tasks.lock().push_back(task);
        true
    }

    /// Reinserts a task at the front (dispatcher-only path, bypasses
    /// the blocked flag so an already-accepted task is never lost).
    pub(crate) fn push_front(&self, task: Task) {
        self.tasks.lock().push_front(task);
    }

    pub(crate) fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Release);
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }
}
