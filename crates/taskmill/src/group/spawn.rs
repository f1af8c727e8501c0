//! Fixed-width run-once group.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PoolError, TaskError};
use crate::group::drain_units;
use crate::task::{WorkFn, WorkRef};
use crate::unit::Unit;

struct SpawnGroupInner {
    work: WorkRef,
    max: Mutex<usize>,
    stagger: Mutex<Duration>,
    started: AtomicBool,
    detached: AtomicBool,
    units: Mutex<Vec<Arc<Unit>>>,
    failures: Mutex<Vec<TaskError>>,
}

/// Spawns up to `max` concurrent copies of one piece of work, then lets
/// them run to completion.
///
/// `start()` launches exactly `max` [`Unit`](crate::unit::Unit)s, each
/// delayed from the previous by a small stagger interval so the runtime
/// is not hit with the whole batch at once, and returns without waiting.
/// `join()` reaps every unit, rethrowing the first captured failure
/// unless the group was [`detach`](SpawnGroup::detach)ed, in which case
/// failures accumulate in an inspectable list instead.
///
/// # Example
/// ```no_run
/// use taskmill::{SpawnGroup, WorkFn};
///
/// # async fn demo() -> Result<(), taskmill::PoolError> {
/// let group = SpawnGroup::new(WorkFn::arc(|| async { Ok(()) }));
/// group.set_max(4)?;
/// group.start()?;
/// group.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct SpawnGroup {
    inner: Arc<SpawnGroupInner>,
    driver: Arc<Unit>,
}

impl SpawnGroup {
    /// Default delay between consecutive unit launches.
    pub const DEFAULT_STAGGER: Duration = Duration::from_millis(1);

    /// Creates a group over the given work with `max = 1`.
    pub fn new(work: WorkRef) -> Self {
        let inner = Arc::new(SpawnGroupInner {
            work,
            max: Mutex::new(1),
            stagger: Mutex::new(Self::DEFAULT_STAGGER),
            started: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            units: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        });
        let driver_inner = Arc::clone(&inner);
        let driver = Arc::new(Unit::new(WorkFn::arc(move || {
            let inner = Arc::clone(&driver_inner);
            async move { spawn_all(inner).await }
        })));
        Self { inner, driver }
    }

    /// Sets the concurrency width. Fails with
    /// [`PoolError::AlreadyStarted`] once the group has started.
    pub fn set_max(&self, max: usize) -> Result<&Self, PoolError> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(PoolError::AlreadyStarted);
        }
        *self.inner.max.lock() = max.max(1);
        Ok(self)
    }

    /// Sets the inter-spawn stagger interval. Fails with
    /// [`PoolError::AlreadyStarted`] once the group has started.
    pub fn set_stagger(&self, stagger: Duration) -> Result<&Self, PoolError> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(PoolError::AlreadyStarted);
        }
        *self.inner.stagger.lock() = stagger;
        Ok(self)
    }

    /// Collects failures instead of rethrowing them from `join()`.
    pub fn detach(&self) -> &Self {
        self.inner.detached.store(true, Ordering::Release);
        self
    }

    /// Launches the group and returns without waiting.
    pub fn start(&self) -> Result<&Self, PoolError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyRunning);
        }
        debug!(max = *self.inner.max.lock(), "starting spawn group");
        self.driver.run()?;
        Ok(self)
    }

    /// Waits for the group's launcher and every spawned unit, then
    /// resolves failures.
    ///
    /// Starts the group first if it was never started. Non-detached
    /// groups rethrow the first captured failure; the rest are kept in
    /// [`failures`](SpawnGroup::failures).
    pub async fn join(&self) -> Result<&Self, PoolError> {
        if !self.inner.started.load(Ordering::Acquire) {
            self.start()?;
        }
        self.driver.join().await?;

        let mut first = None;
        if let Some(failure) = self.driver.take_failure() {
            if self.inner.detached.load(Ordering::Acquire) {
                self.inner.failures.lock().push(failure);
            } else {
                first = Some(failure);
            }
        }

        let drained =
            drain_units(&self.inner.units, &self.inner.detached, &self.inner.failures).await;
        if first.is_none() {
            first = drained;
        } else if let Some(extra) = drained {
            self.inner.failures.lock().push(extra);
        }

        match first {
            Some(failure) => Err(PoolError::Task(failure)),
            None => Ok(self),
        }
    }

    /// Forcibly interrupts the launcher and every live unit. Best-effort.
    pub fn interrupt(&self) -> &Self {
        let _ = self.driver.interrupt();
        for unit in self.inner.units.lock().iter() {
            let _ = unit.interrupt();
        }
        self
    }

    /// Failures collected so far (detached groups, or extras beyond the
    /// first rethrown one).
    pub fn failures(&self) -> Vec<TaskError> {
        self.inner.failures.lock().clone()
    }
}

async fn spawn_all(inner: Arc<SpawnGroupInner>) -> Result<(), TaskError> {
    let max = *inner.max.lock();
    let stagger = *inner.stagger.lock();
    for i in 0..max {
        if i > 0 && !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }
        let unit = Arc::new(Unit::new(Arc::clone(&inner.work)));
        unit.run().map_err(|e| TaskError::failed(e.to_string()))?;
        inner.units.lock().push(unit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_runs_max_copies() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        let group = SpawnGroup::new(WorkFn::arc(move || {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        group.set_max(4).unwrap();
        group.set_stagger(Duration::ZERO).unwrap();
        group.start().unwrap();
        group.join().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_set_max_after_start_fails() {
        let group = SpawnGroup::new(WorkFn::arc(|| async { Ok(()) }));
        group.start().unwrap();
        assert!(matches!(group.set_max(8), Err(PoolError::AlreadyStarted)));
        group.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_reentrant_start_fails() {
        let group = SpawnGroup::new(WorkFn::arc(|| async { Ok(()) }));
        group.start().unwrap();
        assert!(matches!(group.start(), Err(PoolError::AlreadyRunning)));
        group.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_rethrows_first_failure() {
        let group = SpawnGroup::new(WorkFn::arc(|| async { Err(TaskError::failed("boom")) }));
        group.set_max(3).unwrap();
        group.set_stagger(Duration::ZERO).unwrap();
        group.start().unwrap();

        let err = group.join().await.unwrap_err();
        assert!(matches!(err, PoolError::Task(_)));
        // The other two failures stay inspectable.
        assert_eq!(group.failures().len(), 2);
    }

    #[tokio::test]
    async fn test_detached_group_collects_failures() {
        let group = SpawnGroup::new(WorkFn::arc(|| async { Err(TaskError::failed("boom")) }));
        group.set_max(3).unwrap();
        group.set_stagger(Duration::ZERO).unwrap();
        group.detach().start().unwrap();

        group.join().await.unwrap();
        assert_eq!(group.failures().len(), 3);
    }
}
