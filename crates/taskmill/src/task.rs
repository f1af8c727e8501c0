//! Work abstraction: the callable a pool executes, plus the submission pair.
//!
//! [`Work`] is the async, shareable unit of execution. [`WorkFn`] adapts a
//! plain closure into a [`WorkRef`], which is what every pool, queue, and
//! group in this crate accepts. A submission pairs the work with an
//! optional [`ErrorHandler`] that the dispatcher invokes if that task
//! fails.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::TaskError;

/// Shared handle to a piece of work.
pub type WorkRef = Arc<dyn Work>;

/// Per-task failure callback, invoked from the dispatcher's context.
pub type ErrorHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// An executable, shareable unit of work.
///
/// Implementations must be re-runnable: a pool may execute the same
/// `WorkRef` many times (groups spawn several copies, and a unit may be
/// re-run after a join).
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use taskmill::{TaskError, Work};
///
/// struct Probe;
///
/// #[async_trait]
/// impl Work for Probe {
///     async fn run(&self) -> Result<(), TaskError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Executes the work once.
    async fn run(&self) -> Result<(), TaskError>;
}

type BoxedWorkFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// Function-backed [`Work`] implementation.
///
/// Wraps an async closure so it can be submitted anywhere a [`WorkRef`]
/// is expected.
pub struct WorkFn {
    f: Box<dyn Fn() -> BoxedWorkFuture + Send + Sync>,
}

impl WorkFn {
    /// Wraps an async closure as a shared [`WorkRef`].
    ///
    /// # Example
    /// ```
    /// use taskmill::WorkFn;
    ///
    /// let work = WorkFn::arc(|| async { Ok(()) });
    /// ```
    pub fn arc<F, Fut>(f: F) -> WorkRef
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Arc::new(Self {
            f: Box::new(move || Box::pin(f())),
        })
    }
}

#[async_trait]
impl Work for WorkFn {
    async fn run(&self) -> Result<(), TaskError> {
        (self.f)().await
    }
}

/// A unit of submission: the work plus an optional failure handler.
#[derive(Clone)]
pub(crate) struct Task {
    pub(crate) work: WorkRef,
    pub(crate) on_error: Option<ErrorHandler>,
}

/// Runs a piece of work, converting panics into captured [`TaskError`]s.
///
/// This is the single execution path shared by units and pool workers:
/// nothing a task does can unwind into its execution context.
pub(crate) async fn run_captured(work: &dyn Work) -> Result<(), TaskError> {
    match AssertUnwindSafe(work.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}
