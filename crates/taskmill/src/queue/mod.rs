//! Task queue: a FIFO backlog drained by a background dispatcher.

pub(crate) mod backlog;
mod queue;

pub use queue::{QueueConfig, TaskQueue};
