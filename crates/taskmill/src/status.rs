//! Lifecycle state shared by queues and pools.

/// Lifecycle state of a [`TaskQueue`](crate::queue::TaskQueue),
/// [`WorkerPool`](crate::pool::WorkerPool), or
/// [`AdaptivePool`](crate::pool::AdaptivePool).
///
/// Transitions: `Stopped → Running` on start, `Running ⇄ Blocked` on
/// block/unblock, `Running/Blocked → Draining` on finish, `Draining →
/// Stopped` once the backlog empties, and `Stopped → Joined` on join.
/// `Joined` is terminal; a fresh start is not supported after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Not dispatching; the initial state, and the state after stop.
    Stopped,
    /// Dispatching and accepting submissions.
    Running,
    /// Dispatching, but rejecting new submissions.
    Blocked,
    /// Waiting for the backlog to empty before stopping.
    Draining,
    /// Joined; terminal.
    Joined,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_distinctions() {
        assert_ne!(PoolStatus::Running, PoolStatus::Stopped);
        assert_ne!(PoolStatus::Blocked, PoolStatus::Running);
        assert_ne!(PoolStatus::Draining, PoolStatus::Joined);
    }
}
