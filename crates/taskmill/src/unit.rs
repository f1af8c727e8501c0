//! A single cancellable, joinable execution of a piece of work.
//!
//! [`Unit`] wraps one [`WorkRef`](crate::task::WorkRef) and runs it on the
//! async runtime. Any failure the work produces (an `Err` return or a
//! panic) is captured into the unit instead of propagating; callers
//! inspect it explicitly via [`Unit::take_failure`]. This is what lets
//! dispatchers supervise many units without ever being unwound by one.
//!
//! A unit is owned by whichever group or pool created it until joined,
//! and may be re-run after a join (its state resets).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{PoolError, TaskError};
use crate::task::{run_captured, WorkRef};

/// State shared with the spawned execution context.
struct UnitState {
    finished: AtomicBool,
    failure: Mutex<Option<TaskError>>,
}

/// One cancellable, joinable execution of a [`WorkRef`](crate::task::WorkRef).
///
/// Lifecycle: created → running → finished (ok or failed) → joined.
/// Re-running after a join is permitted; the captured state resets.
pub struct Unit {
    work: WorkRef,
    started: AtomicBool,
    state: Arc<UnitState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Unit {
    /// Creates a unit wrapping the given work. Nothing runs until
    /// [`run`](Unit::run) or [`join`](Unit::join) is called.
    pub fn new(work: WorkRef) -> Self {
        Self {
            work,
            started: AtomicBool::new(false),
            state: Arc::new(UnitState {
                finished: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Starts executing the work on the runtime.
    ///
    /// Fails with [`PoolError::AlreadyRunning`] if the unit is running.
    /// Calling `run` on a finished unit starts a fresh execution and
    /// clears any previously captured failure.
    pub fn run(&self) -> Result<&Self, PoolError> {
        if self.started.load(Ordering::Acquire) && !self.state.finished.load(Ordering::Acquire) {
            return Err(PoolError::AlreadyRunning);
        }

        *self.state.failure.lock() = None;
        self.state.finished.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);

        let work = Arc::clone(&self.work);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let outcome = run_captured(work.as_ref()).await;
            if let Err(failure) = outcome {
                *state.failure.lock() = Some(failure);
            }
            state.finished.store(true, Ordering::Release);
        });
        *self.handle.lock() = Some(handle);
        Ok(self)
    }

    /// Blocks the caller until the unit finishes.
    ///
    /// A unit that was never started is started first. Captured failures
    /// are not surfaced here; take them with [`take_failure`](Unit::take_failure).
    pub async fn join(&self) -> Result<(), PoolError> {
        if !self.started.load(Ordering::Acquire) {
            self.run()?;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            // A join error is either a cancellation (interrupt already
            // marked the unit finished) or the runtime shutting down.
            let _ = handle.await;
        }
        Ok(())
    }

    /// Relinquishes the handle to the underlying execution context.
    ///
    /// The work keeps running unsupervised; no further join is required.
    pub fn detach(&self) -> &Self {
        self.handle.lock().take();
        self
    }

    /// Forcibly terminates the unit and marks it finished.
    ///
    /// Best-effort: the work stops at its next suspension point and its
    /// side effects may be left incomplete. Reserve this for emergency
    /// shutdown. Fails with [`PoolError::Interrupt`] when the unit is
    /// running but its handle was already relinquished.
    pub fn interrupt(&self) -> Result<&Self, PoolError> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                handle.abort();
                self.state.finished.store(true, Ordering::Release);
                Ok(self)
            }
            None => {
                if self.started.load(Ordering::Acquire)
                    && !self.state.finished.load(Ordering::Acquire)
                {
                    Err(PoolError::Interrupt(
                        "unit is running but its handle was detached".to_string(),
                    ))
                } else {
                    Ok(self)
                }
            }
        }
    }

    /// Whether [`run`](Unit::run) has been called for the current cycle.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether the current execution has finished (ok, failed, or
    /// interrupted).
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// Hands the captured failure, if any, to the caller.
    pub fn take_failure(&self) -> Option<TaskError> {
        self.state.failure.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::WorkFn;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_work(hits: &Arc<AtomicUsize>) -> WorkRef {
        let hits = Arc::clone(hits);
        WorkFn::arc(move || {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_run_and_join_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let unit = Unit::new(counting_work(&hits));

        unit.run().unwrap();
        assert!(unit.is_started());
        unit.join().await.unwrap();

        assert!(unit.is_finished());
        assert!(unit.take_failure().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_implicitly_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let unit = Unit::new(counting_work(&hits));

        unit.join().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_captured_not_raised() {
        let unit = Unit::new(WorkFn::arc(|| async { Err(TaskError::failed("boom")) }));

        unit.join().await.unwrap();
        let failure = unit.take_failure().unwrap();
        assert!(matches!(failure, TaskError::Failed { ref error } if error == "boom"));
        // The failure is handed over exactly once.
        assert!(unit.take_failure().is_none());
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        async fn explode() -> Result<(), TaskError> {
            panic!("kaboom")
        }

        let unit = Unit::new(WorkFn::arc(|| explode()));
        unit.join().await.unwrap();
        assert!(matches!(
            unit.take_failure(),
            Some(TaskError::Panicked { .. })
        ));
    }

    #[tokio::test]
    async fn test_reentrant_run_fails() {
        let unit = Unit::new(WorkFn::arc(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }));

        unit.run().unwrap();
        assert!(matches!(unit.run(), Err(PoolError::AlreadyRunning)));
        unit.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_rerun_after_join() {
        let hits = Arc::new(AtomicUsize::new(0));
        let unit = Unit::new(counting_work(&hits));

        unit.run().unwrap();
        unit.join().await.unwrap();
        unit.run().unwrap();
        unit.join().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interrupt_marks_finished() {
        let unit = Unit::new(WorkFn::arc(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));

        unit.run().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        unit.interrupt().unwrap();

        assert!(unit.is_finished());
        unit.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_after_detach_fails() {
        let unit = Unit::new(WorkFn::arc(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));

        unit.run().unwrap();
        unit.detach();
        assert!(matches!(unit.interrupt(), Err(PoolError::Interrupt(_))));
    }
}
