//! Worker pool with self-tuning poll cadence.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::duration_millis;
use crate::error::{PoolError, TaskError};
use crate::metrics::PoolMetrics;
use crate::pool::{Pacing, WorkerPool};
use crate::status::PoolStatus;
use crate::task::{ErrorHandler, WorkRef};

/// Adaptive pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Unique pool ID (generated if not provided); used in log fields.
    pub pool_id: String,

    /// Number of persistent workers (and the concurrency ceiling).
    pub max_workers: usize,

    /// Slowest poll interval; the loops idle back toward this.
    #[serde(with = "duration_millis")]
    pub base_poll_interval: Duration,

    /// Responsiveness ratio: the fastest poll is
    /// `base_poll_interval / scale`. Must not exceed the base interval
    /// in nanoseconds.
    pub scale: u32,

    /// Start the pool from the constructor.
    pub auto_start: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            pool_id: format!("pool-{}", Uuid::now_v7()),
            max_workers: 4,
            base_poll_interval: Duration::from_millis(10),
            scale: 100,
            auto_start: false,
        }
    }
}

impl AdaptiveConfig {
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

    /// Sets the slowest poll interval.
    pub fn with_base_poll_interval(mut self, interval: Duration) -> Self {
        self.base_poll_interval = interval;
        self
    }

    /// Sets the responsiveness ratio.
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
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
        if self.scale == 0 {
            return Err(PoolError::InvalidConfiguration(
                "scale must be at least 1".into(),
            ));
        }
        if u128::from(self.scale) > self.base_poll_interval.as_nanos() {
            return Err(PoolError::InvalidConfiguration(format!(
                "scale {} exceeds base poll interval of {}ns",
                self.scale,
                self.base_poll_interval.as_nanos()
            )));
        }
        Ok(())
    }
}

/// A [`WorkerPool`] whose dispatcher and workers recompute their poll
/// interval every cycle.
///
/// Each loop starts at its fastest (`base / scale`), backs off toward
/// `base` across idle cycles, and speeds back up as soon as cycles
/// start dispatching or reaping again: bounded CPU when idle, fast
/// pickup under load. The task-assignment contract is identical to
/// [`WorkerPool`].
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use taskmill::{AdaptiveConfig, AdaptivePool, WorkFn};
///
/// # async fn demo() -> Result<(), taskmill::PoolError> {
/// let pool = AdaptivePool::new(
///     AdaptiveConfig::default()
///         .with_max_workers(2)
///         .with_base_poll_interval(Duration::from_millis(1))
///         .with_scale(1000),
/// )?;
/// pool.start()?;
/// pool.submit(WorkFn::arc(|| async { Ok(()) }));
/// pool.finish(Duration::from_millis(5)).await;
/// pool.join().await?;
/// # Ok(())
/// # }
/// ```
pub struct AdaptivePool {
    pool: WorkerPool,
}

impl AdaptivePool {
    /// Creates an adaptive pool.
    ///
    /// Fails with [`PoolError::InvalidConfiguration`] when `scale` is
    /// zero or exceeds the base poll interval in nanoseconds.
    pub fn new(config: AdaptiveConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let pacing = Pacing::adaptive(config.base_poll_interval, config.scale)?;
        let worker_pacing = Pacing::adaptive(config.base_poll_interval, config.scale)?;
        let pool = WorkerPool::build(
            config.pool_id,
            config.max_workers,
            config.auto_start,
            pacing,
            worker_pacing,
        )?;
        Ok(Self { pool })
    }

    /// Enqueues work with no failure handler. See [`WorkerPool::submit`].
    pub fn submit(&self, work: WorkRef) -> bool {
        self.pool.submit(work)
    }

    /// Enqueues work with a failure handler. See
    /// [`WorkerPool::submit_with`].
    pub fn submit_with(&self, work: WorkRef, on_error: ErrorHandler) -> bool {
        self.pool.submit_with(work, on_error)
    }

    /// Starts the pool. See [`WorkerPool::start`].
    pub fn start(&self) -> Result<&Self, PoolError> {
        self.pool.start()?;
        Ok(self)
    }

    /// Stops the pool. See [`WorkerPool::stop`].
    pub fn stop(&self) -> &Self {
        self.pool.stop();
        self
    }

    /// Rejects new submissions. See [`WorkerPool::block`].
    pub fn block(&self) -> &Self {
        self.pool.block();
        self
    }

    /// Accepts submissions again. See [`WorkerPool::unblock`].
    pub fn unblock(&self) -> &Self {
        self.pool.unblock();
        self
    }

    /// Collects unhandled failures. See [`WorkerPool::detach`].
    pub fn detach(&self) -> &Self {
        self.pool.detach();
        self
    }

    /// Drains the backlog, then stops. See [`WorkerPool::finish`].
    pub async fn finish(&self, poll_wait: Duration) -> &Self {
        self.pool.finish(poll_wait).await;
        self
    }

    /// Waits for everything to exit and resolves remaining failures.
    /// See [`WorkerPool::join`].
    pub async fn join(&self) -> Result<(), PoolError> {
        self.pool.join().await
    }

    /// Forced termination. See [`WorkerPool::interrupt`].
    pub fn interrupt(&self) -> &Self {
        self.pool.interrupt();
        self
    }

    /// Current lifecycle state.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    /// Failures collected while detached.
    pub fn failures(&self) -> Vec<TaskError> {
        self.pool.failures()
    }

    /// Number of tasks waiting for dispatch.
    pub fn backlog_len(&self) -> usize {
        self.pool.backlog_len()
    }

    /// Whether submissions are currently rejected.
    pub fn is_blocked(&self) -> bool {
        self.pool.is_blocked()
    }

    /// The dispatcher's current poll interval, the observable output
    /// of the backoff loop.
    pub fn current_poll_interval(&self) -> Duration {
        self.pool.current_pacing_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::WorkFn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_config_validation() {
        assert!(AdaptiveConfig::default().validate().is_ok());
        assert!(matches!(
            AdaptiveConfig::default().with_scale(0).validate(),
            Err(PoolError::InvalidConfiguration(_))
        ));
        // 1000ns base cannot be split 2000 ways.
        assert!(matches!(
            AdaptiveConfig::default()
                .with_base_poll_interval(Duration::from_nanos(1000))
                .with_scale(2000)
                .validate(),
            Err(PoolError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_scale_fails_construction() {
        let result = AdaptivePool::new(
            AdaptiveConfig::default()
                .with_base_poll_interval(Duration::from_nanos(100))
                .with_scale(200),
        );
        assert!(matches!(result, Err(PoolError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_starts_at_fastest_interval() {
        let pool = AdaptivePool::new(
            AdaptiveConfig::default()
                .with_base_poll_interval(Duration::from_millis(1))
                .with_scale(1000),
        )
        .unwrap();
        assert_eq!(pool.current_poll_interval(), Duration::from_micros(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_contract_as_worker_pool() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&hits);
        let pool = AdaptivePool::new(
            AdaptiveConfig::default()
                .with_max_workers(2)
                .with_base_poll_interval(Duration::from_millis(2))
                .with_scale(100),
        )
        .unwrap();
        pool.start().unwrap();

        for _ in 0..4 {
            assert!(pool.submit(WorkFn::arc({
                let counted = Arc::clone(&counted);
                move || {
                    let counted = Arc::clone(&counted);
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            })));
        }
        pool.block().finish(Duration::from_millis(2)).await;
        pool.join().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(pool.status(), PoolStatus::Joined);
    }
}
