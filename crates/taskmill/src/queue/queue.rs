//! Asynchronous task queue with a background dispatch loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
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
use crate::queue::backlog::Backlog;
use crate::status::PoolStatus;
use crate::task::{ErrorHandler, Task, WorkFn, WorkRef};
use crate::unit::Unit;

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Unique queue ID (generated if not provided); used in log fields.
    pub queue_id: String,

    /// Maximum units live at once.
    pub max_workers: usize,

    /// Dispatcher poll interval.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Start the dispatcher from the constructor.
    pub auto_start: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_id: format!("queue-{}", Uuid::now_v7()),
            max_workers: 4,
            poll_interval: Duration::from_millis(10),
            auto_start: false,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the queue ID.
    pub fn with_queue_id(mut self, id: impl Into<String>) -> Self {
        self.queue_id = id.into();
        self
    }

    /// Sets the concurrency width.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Sets the dispatcher poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts the dispatcher from the constructor.
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

struct QueueSlot {
    unit: Arc<Unit>,
    on_error: Option<ErrorHandler>,
}

struct QueueInner {
    config: QueueConfig,
    backlog: Backlog,
    slots: Mutex<HashMap<u64, QueueSlot>>,
    next_slot: AtomicU64,
    detached: AtomicBool,
    failures: Mutex<Vec<TaskError>>,
    status: RwLock<PoolStatus>,
    shutdown: watch::Sender<bool>,
    counters: Counters,
}

/// An ordered backlog of tasks drained by a background dispatcher that
/// spawns a fresh [`Unit`](crate::unit::Unit) per task.
///
/// [`submit`](TaskQueue::submit) is the one operation safe to call from
/// arbitrary threads concurrently; it appends under the backlog lock
/// and returns `false` when the queue is blocked. Each dispatch cycle
/// spawns units for queued tasks while fewer than `max_workers` are
/// live, then reaps finished units: a captured failure goes to that
/// task's handler if one was supplied, is collected when the queue is
/// [`detach`](TaskQueue::detach)ed, and otherwise fails the dispatcher
/// itself, surfacing from [`join`](TaskQueue::join).
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use taskmill::{QueueConfig, TaskQueue, WorkFn};
///
/// # async fn demo() -> Result<(), taskmill::PoolError> {
/// let queue = TaskQueue::new(QueueConfig::default().with_max_workers(8))?;
/// queue.start()?;
/// queue.submit(WorkFn::arc(|| async { Ok(()) }));
/// queue.finish(Duration::from_millis(5)).await;
/// queue.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct TaskQueue {
    inner: Arc<QueueInner>,
    driver: Arc<Unit>,
}

impl TaskQueue {
    /// Creates a queue. With `auto_start` set, the dispatcher starts
    /// immediately (requires a runtime context).
    pub fn new(config: QueueConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        let auto_start = config.auto_start;
        let inner = Arc::new(QueueInner {
            config,
            backlog: Backlog::new(),
            slots: Mutex::new(HashMap::new()),
            next_slot: AtomicU64::new(0),
            detached: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            status: RwLock::new(PoolStatus::Stopped),
            shutdown,
            counters: Counters::new(),
        });
        let driver_inner = Arc::clone(&inner);
        let driver = Arc::new(Unit::new(WorkFn::arc(move || {
            let inner = Arc::clone(&driver_inner);
            async move { dispatch_loop(inner).await }
        })));

        let queue = Self { inner, driver };
        if auto_start {
            queue.start()?;
        }
        Ok(queue)
    }

    /// Enqueues work with no failure handler.
    ///
    /// Returns `false` without queueing when the queue is blocked.
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
            debug!(queue_id = %self.inner.config.queue_id, "submission rejected; queue is blocked");
        }
        accepted
    }

    /// Starts the dispatcher.
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
            queue_id = %self.inner.config.queue_id,
            max_workers = self.inner.config.max_workers,
            "starting task queue"
        );
        let _ = self.inner.shutdown.send(false);
        self.driver.run()?;
        Ok(self)
    }

    /// Signals the dispatcher to exit after its current cycle.
    pub fn stop(&self) -> &Self {
        let _ = self.inner.shutdown.send(true);
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

    /// Blocks until the backlog is empty, then stops the dispatcher.
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

    /// Waits for the dispatcher to exit, drains every in-flight unit,
    /// and resolves remaining failures.
    ///
    /// Terminal: after `join()` the queue cannot be started again.
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

        loop {
            let slot = {
                let mut slots = self.inner.slots.lock();
                let id = slots.keys().next().copied();
                id.and_then(|id| slots.remove(&id))
            };
            let Some(slot) = slot else { break };
            let _ = slot.unit.join().await;
            match slot.unit.take_failure() {
                None => self.inner.counters.record_completed(),
                Some(failure) => {
                    self.inner.counters.record_failed();
                    if let Some(handler) = slot.on_error.as_ref() {
                        handler(&failure);
                    } else if self.inner.detached.load(Ordering::Acquire) || first.is_some() {
                        self.inner.failures.lock().push(failure);
                    } else {
                        first = Some(failure);
                    }
                }
            }
        }

        *self.inner.status.write() = PoolStatus::Joined;
        match first {
            Some(failure) => Err(PoolError::Task(failure)),
            None => Ok(()),
        }
    }

    /// Forcibly interrupts the dispatcher and every live unit.
    /// Best-effort; see [`Unit::interrupt`](crate::unit::Unit::interrupt).
    pub fn interrupt(&self) -> &Self {
        if let Err(e) = self.driver.interrupt() {
            warn!(queue_id = %self.inner.config.queue_id, error = %e, "dispatcher interrupt failed");
        }
        for (id, slot) in self.inner.slots.lock().iter() {
            if let Err(e) = slot.unit.interrupt() {
                warn!(queue_id = %self.inner.config.queue_id, slot = id, error = %e, "unit interrupt failed");
            }
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
}

async fn dispatch_loop(inner: Arc<QueueInner>) -> Result<(), TaskError> {
    let mut shutdown = inner.shutdown.subscribe();
    let poll = inner.config.poll_interval;
    debug!(queue_id = %inner.config.queue_id, "dispatcher started");

    loop {
        // The stop signal may predate this task's first poll.
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        // Spawn fresh units for queued tasks while below the width cap.
        loop {
            if inner.slots.lock().len() >= inner.config.max_workers {
                break;
            }
            let Some(task) = inner.backlog.pop() else { break };
            let unit = Arc::new(Unit::new(Arc::clone(&task.work)));
            if let Err(e) = unit.run() {
                return Err(TaskError::failed(e.to_string()));
            }
            let id = inner.next_slot.fetch_add(1, Ordering::Relaxed);
            inner.slots.lock().insert(
                id,
                QueueSlot {
                    unit,
                    on_error: task.on_error,
                },
            );
            inner.counters.record_dispatched();
        }

        // Reap finished units.
        let finished: Vec<(u64, QueueSlot)> = {
            let mut slots = inner.slots.lock();
            let ids: Vec<u64> = slots
                .iter()
                .filter(|(_, slot)| slot.unit.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| slots.remove(&id).map(|slot| (id, slot)))
                .collect()
        };
        for (id, slot) in finished {
            let _ = slot.unit.join().await;
            match slot.unit.take_failure() {
                None => inner.counters.record_completed(),
                Some(failure) => {
                    inner.counters.record_failed();
                    if let Some(handler) = slot.on_error.as_ref() {
                        handler(&failure);
                    } else if inner.detached.load(Ordering::Acquire) {
                        inner.failures.lock().push(failure);
                    } else {
                        warn!(
                            queue_id = %inner.config.queue_id,
                            slot = id,
                            error = %failure,
                            "task failed with no handler; dispatcher going down"
                        );
                        return Err(failure);
                    }
                }
            }
        }
    }

    debug!(queue_id = %inner.config.queue_id, "dispatcher stopped");
    Ok(())
}
