//! Persistent-worker pools.
//!
//! A [`WorkerPool`] owns a fixed arena of long-lived workers that are
//! reused across tasks (no per-task spawn cost) and replaced when they
//! fail. [`AdaptivePool`] is the same contract with a self-tuning poll
//! cadence driven by [`AdaptiveBackoff`].

mod adaptive;
mod backoff;
mod pool;
mod worker;

pub use adaptive::{AdaptiveConfig, AdaptivePool};
pub use backoff::AdaptiveBackoff;
pub use pool::{PoolConfig, WorkerPool};

use std::time::Duration;

use parking_lot::Mutex;

use crate::error::PoolError;

/// How a polling loop picks its next sleep.
///
/// `Fixed` sleeps a constant interval; `Adaptive` consults (and feeds)
/// an [`AdaptiveBackoff`]. Each loop owns its own instance, so a
/// dispatcher and every worker back off independently.
pub(crate) enum Pacing {
    Fixed(Duration),
    Adaptive(Mutex<AdaptiveBackoff>),
}

impl Pacing {
    pub(crate) fn fixed(interval: Duration) -> Self {
        Pacing::Fixed(interval)
    }

    pub(crate) fn adaptive(base: Duration, scale: u32) -> Result<Self, PoolError> {
        Ok(Pacing::Adaptive(Mutex::new(AdaptiveBackoff::new(
            base, scale,
        )?)))
    }

    /// Returns the next wait, first recording the previous cycle's
    /// outcome when there was one (`None` on the very first cycle).
    pub(crate) fn next_wait(&self, progressed: Option<bool>) -> Duration {
        match self {
            Pacing::Fixed(interval) => *interval,
            Pacing::Adaptive(backoff) => {
                let mut backoff = backoff.lock();
                if let Some(progressed) = progressed {
                    backoff.record(progressed);
                }
                backoff.current()
            }
        }
    }

    /// The wait the loop would use right now, without recording.
    pub(crate) fn current(&self) -> Duration {
        match self {
            Pacing::Fixed(interval) => *interval,
            Pacing::Adaptive(backoff) => backoff.lock().current(),
        }
    }

    /// A reset copy for a fresh loop (replacement workers start fast).
    pub(crate) fn fresh(&self) -> Self {
        match self {
            Pacing::Fixed(interval) => Pacing::Fixed(*interval),
            Pacing::Adaptive(backoff) => Pacing::Adaptive(Mutex::new(backoff.lock().reset())),
        }
    }
}
