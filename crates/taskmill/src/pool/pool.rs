//! Persistent-worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::duration_millis;
use crate::error::{PoolError, TaskError};
use crate::metrics::{Counters, PoolMetrics};
use crate::pool::worker::PoolWorker;
use crate::pool::Pacing;
use crate::queue::backlog::Backlog;
use crate::status::PoolStatus;
use crate::task::{ErrorHandler, Task, WorkFn, WorkRef};
use crate::unit::Unit;

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Unique pool ID (generated if not provided); used in log fields.
    pub pool_id: String,

    /// Number of persistent workers (and the concurrency ceiling).
    pub max_workers: usize,

    /// Poll interval of the dispatcher and of each worker's own loop.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Start the pool from the constructor.
    pub auto_start: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_id: format!("pool-{}", Uuid::now_v7()),
            max_workers: 4,
            poll_interval: Duration::from_millis(10),
            auto_start: false,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool ID.
    pub fn with_pool_id(mut self, id: impl Into<String>) -> Self {
        self.pool_id = id.into();
        self
    }

    /// Sets the worker count.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts the pool from the constructor.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) struct PoolInner {
    pool_id: String,
    max_workers: usize,
    backlog: Backlog,
    workers: Mutex<Vec<Arc<PoolWorker>>>,
    detached: AtomicBool,
    failures: Mutex<Vec<TaskError>>,
    status: RwLock<PoolStatus>,
    shutdown: watch::Sender<bool>,
    counters: Arc<Counters>,
    pacing: Pacing,
    worker_pacing: Pacing,
}

impl PoolInner {
    fn stop_workers(&self) {
        for worker in self.workers.lock().iter() {
            worker.shutdown();
        }
    }
}

/// A pool of exactly `max_workers` persistent workers fed from a FIFO
/// backlog.
///
/// Workers are pre-allocated and reused across tasks, so dispatch has
/// no spawn cost: the dispatcher claims a ready worker with an atomic
/// compare-and-set and hands it the next task in submission order. A
/// worker that fails is reaped (its captured failure resolved through
/// the task's handler, the pool's detached list, or a dispatcher
/// rethrow) and its slot is filled with a brand-new worker; a failed
/// worker is never reused.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use taskmill::{PoolConfig, WorkerPool, WorkFn};
///
/// # async fn demo() -> Result<(), taskmill::PoolError> {
/// let pool = WorkerPool::new(PoolConfig::default().with_max_workers(3))?;
/// pool.start()?;
/// for _ in 0..10 {
///     pool.submit(WorkFn::arc(|| async { Ok(()) }));
/// }
/// pool.block().finish(Duration::from_millis(5)).await;
/// pool.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    driver: Arc<Unit>,
}

impl WorkerPool {
    /// Creates a fixed-cadence pool. With `auto_start` set, the pool
    /// starts immediately (requires a runtime context).
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let pacing = Pacing::fixed(config.poll_interval);
        let worker_pacing = Pacing::fixed(config.poll_interval);
        Self::build(
            config.pool_id,
            config.max_workers,
            config.auto_start,
            pacing,
            worker_pacing,
        )
    }

    pub(crate) fn build(
        pool_id: String,
        max_workers: usize,
        auto_start: bool,
        pacing: Pacing,
        worker_pacing: Pacing,
    ) -> Result<Self, PoolError> {
        let (shutdown, _) = watch::channel(false);
        let counters = Arc::new(Counters::new());
        let workers = (0..max_workers)
            .map(|slot| PoolWorker::new(slot, worker_pacing.fresh(), Arc::clone(&counters)))
            .collect();

        let inner = Arc::new(PoolInner {
            pool_id,
            max_workers,
            backlog: Backlog::new(),
            workers: Mutex::new(workers),
            detached: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            status: RwLock::new(PoolStatus::Stopped),
            shutdown,
            counters,
            pacing,
            worker_pacing,
        });
        let driver_inner = Arc::clone(&inner);
        let driver = Arc::new(Unit::new(WorkFn::arc(move || {
            let inner = Arc::clone(&driver_inner);
            async move { dispatch_loop(inner).await }
        })));

        let pool = Self { inner, driver };
        if auto_start {
            pool.start()?;
        }
        Ok(pool)
    }

    /// Enqueues work with no failure handler.
    ///
    /// Returns `false` without queueing when the pool is blocked.
    pub fn submit(&self, work: WorkRef) -> bool {
        self.push_task(work, None)
    }

    /// Enqueues work with a failure handler invoked from the
    /// dispatcher's context if the task fails.
    pub fn submit_with(&self, work: WorkRef, on_error: ErrorHandler) -> bool {
        self.push_task(work, Some(on_error))
    }

    fn push_task(&self, work: WorkRef, on_error: Option<ErrorHandler>) -> bool {
        let accepted = self.inner.backlog.push(Task { work, on_error });
        if accepted {
            self.inner.counters.record_submitted();
        } else {
            debug!(pool_id = %self.inner.pool_id, "submission rejected; pool is blocked");
        }
        accepted
    }

    /// Starts every worker's run loop and the dispatcher.
    ///
    /// Fails with [`PoolError::AlreadyRunning`] while running and
    /// [`PoolError::AlreadyStarted`] after a join.
    pub fn start(&self) -> Result<&Self, PoolError> {
        {
            let mut status = self.inner.status.write();
            match *status {
                PoolStatus::Stopped => {
                    // stop() flips the status before the old loop exits;
                    // a start racing that window must not double-run the
                    // dispatcher.
                    if self.driver.is_started() && !self.driver.is_finished() {
                        return Err(PoolError::AlreadyRunning);
                    }
                    *status = PoolStatus::Running;
                }
                PoolStatus::Joined => return Err(PoolError::AlreadyStarted),
                _ => return Err(PoolError::AlreadyRunning),
            }
        }
        info!(
            pool_id = %self.inner.pool_id,
            max_workers = self.inner.max_workers,
            "starting worker pool"
        );
        let _ = self.inner.shutdown.send(false);
        {
            let mut workers = self.inner.workers.lock();
            for slot in 0..workers.len() {
                // Returning from a previous stop: slots whose loops have
                // exited get fresh workers.
                if workers[slot].is_stopping() {
                    workers[slot] = PoolWorker::new(
                        slot,
                        self.inner.worker_pacing.fresh(),
                        Arc::clone(&self.inner.counters),
                    );
                }
                workers[slot].start();
            }
        }
        self.driver.run()?;
        Ok(self)
    }

    /// Signals the dispatcher and every worker to exit after their
    /// current unit of work.
    pub fn stop(&self) -> &Self {
        let _ = self.inner.shutdown.send(true);
        self.inner.stop_workers();
        let mut status = self.inner.status.write();
        if *status != PoolStatus::Joined {
            *status = PoolStatus::Stopped;
        }
        self
    }

    /// Rejects new submissions; queued and in-flight tasks are
    /// unaffected.
    pub fn block(&self) -> &Self {
        self.inner.backlog.set_blocked(true);
        let mut status = self.inner.status.write();
        if *status == PoolStatus::Running {
            *status = PoolStatus::Blocked;
        }
        self
    }

    /// Accepts submissions again.
    pub fn unblock(&self) -> &Self {
        self.inner.backlog.set_blocked(false);
        let mut status = self.inner.status.write();
        if *status == PoolStatus::Blocked {
            *status = PoolStatus::Running;
        }
        self
    }

    /// Collects unhandled failures instead of failing the dispatcher.
    pub fn detach(&self) -> &Self {
        self.inner.detached.store(true, Ordering::Release);
        self
    }

    /// Blocks until the backlog is empty, then stops the pool.
    ///
    /// `poll_wait` is the interval between emptiness checks.
    pub async fn finish(&self, poll_wait: Duration) -> &Self {
        {
            let mut status = self.inner.status.write();
            if matches!(*status, PoolStatus::Running | PoolStatus::Blocked) {
                *status = PoolStatus::Draining;
            }
        }
        // A dead dispatcher (never started, or downed by an unhandled
        // failure) will never drain the backlog; don't wait on it.
        while !self.inner.backlog.is_empty()
            && self.driver.is_started()
            && !self.driver.is_finished()
        {
            tokio::time::sleep(poll_wait).await;
        }
        self.stop();
        // Draining ends only when the dispatcher has actually exited;
        // a follow-up start() must never race the old loop.
        while self.driver.is_started() && !self.driver.is_finished() {
            tokio::time::sleep(poll_wait).await;
        }
        self
    }

    /// Waits for the dispatcher and every worker to exit, then resolves
    /// remaining failures.
    ///
    /// Terminal: after `join()` the pool cannot be started again.
    pub async fn join(&self) -> Result<(), PoolError> {
        let mut first = None;

        if self.driver.is_started() {
            self.driver.join().await?;
            if let Some(failure) = self.driver.take_failure() {
                if self.inner.detached.load(Ordering::Acquire) {
                    self.inner.failures.lock().push(failure);
                } else {
                    first = Some(failure);
                }
            }
        }

        let workers: Vec<Arc<PoolWorker>> =
            self.inner.workers.lock().iter().map(Arc::clone).collect();
        for worker in workers {
            if let Some(handle) = worker.take_handle() {
                let _ = handle.await;
            }
            if let Some(failure) = worker.take_failure() {
                self.inner.counters.record_failed();
                let handler = worker.take_handler();
                if let Some(handler) = handler {
                    handler(&failure);
                } else if self.inner.detached.load(Ordering::Acquire) || first.is_some() {
                    self.inner.failures.lock().push(failure);
                } else {
                    first = Some(failure);
                }
            }
        }

        *self.inner.status.write() = PoolStatus::Joined;
        match first {
            Some(failure) => Err(PoolError::Task(failure)),
            None => Ok(()),
        }
    }

    /// Forcibly interrupts the dispatcher and every worker mid-task.
    /// Best-effort; see [`Unit::interrupt`](crate::unit::Unit::interrupt).
    pub fn interrupt(&self) -> &Self {
        if let Err(e) = self.driver.interrupt() {
            warn!(pool_id = %self.inner.pool_id, error = %e, "dispatcher interrupt failed");
        }
        for worker in self.inner.workers.lock().iter() {
            worker.interrupt();
        }
        let mut status = self.inner.status.write();
        if *status != PoolStatus::Joined {
            *status = PoolStatus::Stopped;
        }
        self
    }

    /// Current lifecycle state.
    pub fn status(&self) -> PoolStatus {
        *self.inner.status.read()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.counters.snapshot()
    }

    /// Failures collected while detached (plus extras beyond the first
    /// rethrown one).
    pub fn failures(&self) -> Vec<TaskError> {
        self.inner.failures.lock().clone()
    }

    /// Number of tasks waiting for dispatch.
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.len()
    }

    /// Whether submissions are currently rejected.
    pub fn is_blocked(&self) -> bool {
        self.inner.backlog.is_blocked()
    }

    /// The dispatcher's current poll interval.
    pub(crate) fn current_pacing_interval(&self) -> Duration {
        self.inner.pacing.current()
    }
}

async fn dispatch_loop(inner: Arc<PoolInner>) -> Result<(), TaskError> {
    let mut shutdown = inner.shutdown.subscribe();
    debug!(pool_id = %inner.pool_id, "dispatcher started");
    let mut progressed: Option<bool> = None;

    loop {
        // The stop signal may predate this task's first poll.
        if *shutdown.borrow() {
            break;
        }
        let wait = inner.pacing.next_wait(progressed);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        match dispatch_cycle(&inner).await {
            Ok(did_work) => progressed = Some(did_work),
            Err(failure) => {
                // An unhandled task failure ends the dispatcher and
                // takes the pool's workers down with it.
                warn!(
                    pool_id = %inner.pool_id,
                    error = %failure,
                    "task failed with no handler; dispatcher going down"
                );
                inner.stop_workers();
                return Err(failure);
            }
        }
    }

    debug!(pool_id = %inner.pool_id, "dispatcher stopped");
    Ok(())
}

/// One dispatch pass: hand backlog tasks to ready workers, then reap
/// and replace failed workers. Reports whether anything happened, which
/// is what adaptive pacing feeds on.
async fn dispatch_cycle(inner: &Arc<PoolInner>) -> Result<bool, TaskError> {
    let mut progressed = false;

    {
        let workers = inner.workers.lock();
        for worker in workers.iter() {
            if inner.backlog.is_empty() {
                break;
            }
            if !worker.is_ready() {
                continue;
            }
            if let Some(task) = inner.backlog.pop() {
                match worker.assign_if_ready(task) {
                    Ok(()) => {
                        inner.counters.record_dispatched();
                        progressed = true;
                    }
                    Err(task) => inner.backlog.push_front(task),
                }
            }
        }
    }

    let failed: Vec<(usize, Arc<PoolWorker>)> = {
        let workers = inner.workers.lock();
        workers
            .iter()
            .enumerate()
            .filter(|(_, worker)| worker.is_failed())
            .map(|(slot, worker)| (slot, Arc::clone(worker)))
            .collect()
    };
    for (slot, worker) in failed {
        let failure = worker.take_failure();
        let handler = worker.take_handler();
        worker.shutdown();
        if let Some(handle) = worker.take_handle() {
            let _ = handle.await;
        }

        // A failed worker is never reused: the slot gets a fresh one.
        let fresh = PoolWorker::new(
            slot,
            inner.worker_pacing.fresh(),
            Arc::clone(&inner.counters),
        );
        fresh.start();
        inner.workers.lock()[slot] = fresh;
        inner.counters.record_worker_replaced();
        debug!(pool_id = %inner.pool_id, slot, "replaced failed worker");
        progressed = true;

        if let Some(failure) = failure {
            inner.counters.record_failed();
            match handler {
                Some(handler) => handler(&failure),
                None => {
                    if inner.detached.load(Ordering::Acquire) {
                        inner.failures.lock().push(failure);
                    } else {
                        return Err(failure);
                    }
                }
            }
        }
    }

    Ok(progressed)
}
