//! Bounded-width batch group: exactly `total` runs, at most `max` live.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PoolError, TaskError};
use crate::group::drain_units;
use crate::task::{WorkFn, WorkRef};
use crate::unit::Unit;

struct BatchGroupInner {
    work: WorkRef,
    total: usize,
    max: Mutex<usize>,
    poll: Mutex<Duration>,
    started: AtomicBool,
    detached: AtomicBool,
    completed: AtomicUsize,
    units: Mutex<Vec<Arc<Unit>>>,
    failures: Mutex<Vec<TaskError>>,
}

/// Runs one piece of work exactly `total` times, keeping at most `max`
/// executions live at any moment.
///
/// The driver loop tops the live set up to `max`, reaps finished units
/// as it goes, and repeats until all `total` have run. A reaped failure
/// stops the batch on a non-detached group (no further units are
/// spawned); detached groups keep going and collect every failure.
pub struct BatchGroup {
    inner: Arc<BatchGroupInner>,
    driver: Arc<Unit>,
}

impl BatchGroup {
    /// Default interval between driver top-up passes.
    pub const DEFAULT_POLL: Duration = Duration::from_millis(1);

    /// Creates a group that will run `work` exactly `total` times with
    /// `max = 1`.
    pub fn new(work: WorkRef, total: usize) -> Self {
        let inner = Arc::new(BatchGroupInner {
            work,
            total,
            max: Mutex::new(1),
            poll: Mutex::new(Self::DEFAULT_POLL),
            started: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            units: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        });
        let driver_inner = Arc::clone(&inner);
        let driver = Arc::new(Unit::new(WorkFn::arc(move || {
            let inner = Arc::clone(&driver_inner);
            async move { drive(inner).await }
        })));
        Self { inner, driver }
    }

    /// Sets the live-concurrency cap. Fails with
    /// [`PoolError::AlreadyStarted`] once the group has started.
    pub fn set_max(&self, max: usize) -> Result<&Self, PoolError> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(PoolError::AlreadyStarted);
        }
        *self.inner.max.lock() = max.max(1);
        Ok(self)
    }

    /// Sets the driver poll interval. Fails with
    /// [`PoolError::AlreadyStarted`] once the group has started.
    pub fn set_poll_interval(&self, poll: Duration) -> Result<&Self, PoolError> {
        if self.inner.started.load(Ordering::Acquire) {
            return Err(PoolError::AlreadyStarted);
        }
        *self.inner.poll.lock() = poll;
        Ok(self)
    }

    /// Collects failures instead of rethrowing them from `join()`.
    pub fn detach(&self) -> &Self {
        self.inner.detached.store(true, Ordering::Release);
        self
    }

    /// Launches the batch driver and returns without waiting.
    pub fn start(&self) -> Result<&Self, PoolError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyRunning);
        }
        debug!(
            total = self.inner.total,
            max = *self.inner.max.lock(),
            "starting batch group"
        );
        self.driver.run()?;
        Ok(self)
    }

    /// Waits for the driver and every spawned unit, then resolves
    /// failures exactly like [`SpawnGroup::join`](crate::group::SpawnGroup::join).
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

    /// Forcibly interrupts the driver and every live unit. Best-effort.
    pub fn interrupt(&self) -> &Self {
        let _ = self.driver.interrupt();
        for unit in self.inner.units.lock().iter() {
            let _ = unit.interrupt();
        }
        self
    }

    /// Units reaped so far.
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Failures collected so far.
    pub fn failures(&self) -> Vec<TaskError> {
        self.inner.failures.lock().clone()
    }
}

async fn drive(inner: Arc<BatchGroupInner>) -> Result<(), TaskError> {
    let max = *inner.max.lock();
    let poll = *inner.poll.lock();
    let mut spawned = 0usize;

    loop {
        // Reap whatever finished since the last pass.
        let finished: Vec<Arc<Unit>> = {
            let mut units = inner.units.lock();
            let mut done = Vec::new();
            let mut i = 0;
            while i < units.len() {
                if units[i].is_finished() {
                    done.push(units.remove(i));
                } else {
                    i += 1;
                }
            }
            done
        };
        for unit in finished {
            let _ = unit.join().await;
            inner.completed.fetch_add(1, Ordering::Release);
            if let Some(failure) = unit.take_failure() {
                if inner.detached.load(Ordering::Acquire) {
                    inner.failures.lock().push(failure);
                } else {
                    return Err(failure);
                }
            }
        }

        // Top the live set back up.
        while spawned < inner.total && inner.units.lock().len() < max {
            let unit = Arc::new(Unit::new(Arc::clone(&inner.work)));
            unit.run().map_err(|e| TaskError::failed(e.to_string()))?;
            inner.units.lock().push(unit);
            spawned += 1;
        }

        if inner.completed.load(Ordering::Acquire) >= inner.total {
            break;
        }
        tokio::time::sleep(poll).await;
    }
    Ok(())
}
