//! Long-lived pool worker.
//!
//! A [`PoolWorker`] loops on its own poll cadence, executing whatever
//! task is assigned to its slot and marking itself ready again, until
//! told to stop. A failure parks the worker instead: the pool reaps the
//! captured error and replaces the slot with a brand-new worker, so a
//! worker that has failed is never handed new work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;
use crate::metrics::Counters;
use crate::pool::Pacing;
use crate::task::{run_captured, ErrorHandler, Task};

pub(crate) struct PoolWorker {
    slot: usize,
    /// True while the worker is idle and may be handed work. Claimed
    /// with a compare-and-set so assignment never takes a table lock.
    ready: AtomicBool,
    assignment: Mutex<Option<Task>>,
    active_handler: Mutex<Option<ErrorHandler>>,
    failure: Mutex<Option<TaskError>>,
    failed: AtomicBool,
    stop: CancellationToken,
    pacing: Pacing,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PoolWorker {
    pub(crate) fn new(slot: usize, pacing: Pacing, counters: Arc<Counters>) -> Arc<Self> {
        Arc::new(Self {
            slot,
            ready: AtomicBool::new(true),
            assignment: Mutex::new(None),
            active_handler: Mutex::new(None),
            failure: Mutex::new(None),
            failed: AtomicBool::new(false),
            stop: CancellationToken::new(),
            pacing,
            counters,
            handle: Mutex::new(None),
        })
    }

    /// Spawns the worker's run loop.
    pub(crate) fn start(self: &Arc<Self>) {
        let worker = Arc::clone(self);
        let handle = tokio::spawn(worker.run_loop());
        *self.handle.lock() = Some(handle);
    }

    /// Atomically claims the worker and hands it a task.
    ///
    /// The claim is a compare-and-set on the `ready` flag, so a worker
    /// mid-execution can never be double-assigned. A refused task is
    /// handed back to the caller.
    pub(crate) fn assign_if_ready(&self, task: Task) -> Result<(), Task> {
        if self
            .ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(task);
        }
        *self.assignment.lock() = Some(task);
        Ok(())
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn take_failure(&self) -> Option<TaskError> {
        self.failure.lock().take()
    }

    pub(crate) fn take_handler(&self) -> Option<ErrorHandler> {
        self.active_handler.lock().take()
    }

    pub(crate) fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().take()
    }

    /// Tells the loop to exit after any current or pending assignment.
    pub(crate) fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Forced termination: cancels the loop and aborts it mid-task.
    pub(crate) fn interrupt(&self) {
        self.stop.cancel();
        if let Some(handle) = self.take_handle() {
            handle.abort();
        }
    }

    async fn run_loop(self: Arc<Self>) {
        debug!(slot = self.slot, "pool worker started");
        let mut progressed: Option<bool> = None;

        loop {
            // A pending assignment always runs, even during shutdown:
            // it was claimed from the backlog and must not be lost.
            let task = self.assignment.lock().take();
            if let Some(task) = task {
                *self.active_handler.lock() = task.on_error.clone();
                match run_captured(task.work.as_ref()).await {
                    Ok(()) => {
                        *self.active_handler.lock() = None;
                        self.counters.record_completed();
                        progressed = Some(true);
                        self.ready.store(true, Ordering::Release);
                        continue;
                    }
                    Err(failure) => {
                        // Park. The slot owner reaps the failure and
                        // replaces this worker.
                        *self.failure.lock() = Some(failure);
                        self.failed.store(true, Ordering::Release);
                        break;
                    }
                }
            }

            if self.stop.is_cancelled() {
                break;
            }

            let wait = self.pacing.next_wait(progressed);
            progressed = Some(false);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.stop.cancelled() => {}
            }
        }
        debug!(slot = self.slot, "pool worker exited");
    }
}
