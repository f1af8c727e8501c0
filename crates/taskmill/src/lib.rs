//! # Taskmill
//!
//! A concurrent task-execution toolkit: worker-pool abstractions that
//! spawn, reuse, monitor, and recycle execution units.
//!
//! ## Features
//!
//! - **Captured failures**: a task's `Err` or panic is stored in its
//!   execution unit and inspected explicitly; nothing a task does can
//!   unwind into the loop supervising it
//! - **Run-once groups**: launch `max` copies of one piece of work
//!   ([`SpawnGroup`]), or exactly `total` runs with bounded live
//!   concurrency ([`BatchGroup`])
//! - **Task queue**: FIFO backlog drained by a background dispatcher
//!   that spawns a fresh unit per task ([`TaskQueue`])
//! - **Persistent workers**: a fixed arena of long-lived workers with
//!   no per-task spawn cost; failed workers are replaced, never reused
//!   ([`WorkerPool`])
//! - **Adaptive pacing**: poll intervals that back off while idle and
//!   recover under load ([`AdaptivePool`], [`AdaptiveBackoff`])
//!
//! ## Architecture
//!
//! ```text
//! submit(work, on_error?) ──► Backlog (FIFO, lock-guarded)
//!                                │ pop in submission order
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatcher (one polling unit per queue/pool)                │
//! │  - hands tasks to ready workers / spawns fresh units         │
//! │  - reaps finished units, resolves captured failures:         │
//! │      handler → detached list → rethrow (fails dispatcher)    │
//! │  - replaces failed persistent workers                        │
//! └─────────────────────────────────────────────────────────────┘
//!                                │
//!                ▼               ▼               ▼
//!           ┌────────┐      ┌────────┐      ┌────────┐
//!           │ worker │      │ worker │      │ worker │   (× max)
//!           └────────┘      └────────┘      └────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use taskmill::{PoolConfig, WorkerPool, WorkFn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), taskmill::PoolError> {
//!     let pool = WorkerPool::new(PoolConfig::default().with_max_workers(3))?;
//!     pool.start()?;
//!
//!     for _ in 0..10 {
//!         pool.submit(WorkFn::arc(|| async {
//!             // do work...
//!             Ok(())
//!         }));
//!     }
//!
//!     pool.block().finish(Duration::from_millis(5)).await;
//!     pool.join().await?;
//!     Ok(())
//! }
//! ```

mod config;

pub mod error;
pub mod group;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod status;
pub mod task;
pub mod unit;

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{PoolError, TaskError};
    pub use crate::group::{BatchGroup, SpawnGroup};
    pub use crate::metrics::PoolMetrics;
    pub use crate::pool::{
        AdaptiveBackoff, AdaptiveConfig, AdaptivePool, PoolConfig, WorkerPool,
    };
    pub use crate::queue::{QueueConfig, TaskQueue};
    pub use crate::status::PoolStatus;
    pub use crate::task::{ErrorHandler, Work, WorkFn, WorkRef};
    pub use crate::unit::Unit;
}

// Re-export key types at crate root
pub use error::{PoolError, TaskError};
pub use group::{BatchGroup, SpawnGroup};
pub use metrics::PoolMetrics;
pub use pool::{AdaptiveBackoff, AdaptiveConfig, AdaptivePool, PoolConfig, WorkerPool};
pub use queue::{QueueConfig, TaskQueue};
pub use status::PoolStatus;
pub use task::{ErrorHandler, Work, WorkFn, WorkRef};
pub use unit::Unit;
