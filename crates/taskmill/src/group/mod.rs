//! Run-once worker groups.
//!
//! Groups spawn a batch of [`Unit`](crate::unit::Unit)s from a single
//! piece of work and join them as one: [`SpawnGroup`] starts exactly
//! `max` units at once (staggered), [`BatchGroup`] runs exactly `total`
//! units while keeping at most `max` live.

mod batch;
mod spawn;

pub use batch::BatchGroup;
pub use spawn::SpawnGroup;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TaskError;
use crate::unit::Unit;

/// Joins every unit left in `units`, routing captured failures.
///
/// Detached groups append every failure to `failures`; otherwise the
/// first failure is returned for the caller to rethrow and any further
/// ones still land in the inspectable list.
pub(crate) async fn drain_units(
    units: &Mutex<Vec<Arc<Unit>>>,
    detached: &AtomicBool,
    failures: &Mutex<Vec<TaskError>>,
) -> Option<TaskError> {
    let mut first = None;
    loop {
        let unit = units.lock().pop();
        let Some(unit) = unit else { break };
        let _ = unit.join().await;
        if let Some(failure) = unit.take_failure() {
            if detached.load(Ordering::Acquire) || first.is_some() {
                failures.lock().push(failure);
            } else {
                first = Some(failure);
            }
        }
    }
    first
}
