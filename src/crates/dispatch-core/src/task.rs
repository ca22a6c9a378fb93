//! Asynchronous task handles
//!
//! A [`Task`] is a clonable handle over exactly one resolution. It starts out in
//! one of three shapes:
//!
//! - **ready** ([`Task::ready`], [`Task::failed`]) - the outcome is already known
//! - **lazy** ([`Task::lazy`], [`Task::from_future`]) - runnable but not started;
//!   the first [`run`](Task::run) or [`resolve`](Task::resolve) forces it on the
//!   calling thread
//! - **promised** ([`Task::promise`]) - completed from elsewhere through the
//!   paired [`Promise`]
//!
//! The outcome can be moved out once, by [`Task::resolve`]. The machine relies on
//! this to guarantee that no queued task is folded twice: a second `resolve` is a
//! [`DispatchError::ProtocolViolation`].
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::Task;
//! use std::thread;
//!
//! let (task, promise) = Task::promise();
//! assert!(!task.is_resolved());
//!
//! thread::spawn(move || promise.complete(7));
//! assert_eq!(task.resolve().unwrap(), 7);
//! assert!(task.resolve().is_err());
//! ```

use crate::error::{DispatchError, Result};
use dispatch_sequence::{panic_message, Latch};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

type Work<A> = Box<dyn FnOnce() -> Result<A> + Send + 'static>;

struct Inner<A> {
    id: TaskId,
    work: Mutex<Option<Work<A>>>,
    outcome: Latch<Result<A>>,
}

/// Clonable handle over one asynchronous resolution
pub struct Task<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Task<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Send + 'static> Task<A> {
    fn with(work: Option<Work<A>>, outcome: Latch<Result<A>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::next(),
                work: Mutex::new(work),
                outcome,
            }),
        }
    }

    /// Already-resolved task holding `value`
    pub fn ready(value: A) -> Self {
        Self::with(None, Latch::with_value(Ok(value)))
    }

    /// Already-resolved task holding a failure
    pub fn failed(error: DispatchError) -> Self {
        Self::with(None, Latch::with_value(Err(error)))
    }

    /// Task that runs `work` when first forced
    pub fn lazy<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<A> + Send + 'static,
    {
        Self::with(Some(Box::new(work)), Latch::new())
    }

    /// Task that drives `future` to completion when first forced
    ///
    /// The future is polled with a blocking executor on the forcing thread, so
    /// it must not depend on being polled inside a tokio runtime.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<A>> + Send + 'static,
    {
        Self::lazy(move || futures::executor::block_on(future))
    }

    /// Task completed from elsewhere through the returned [`Promise`]
    pub fn promise() -> (Self, Promise<A>) {
        let task = Self::with(None, Latch::new());
        let promise = Promise {
            inner: Some(task.inner.clone()),
        };
        (task, promise)
    }

    /// Force a lazy task on the calling thread
    ///
    /// Does nothing when the task is ready, promised, or already forced. A
    /// panic inside the work becomes a [`DispatchError::Task`] outcome.
    pub fn run(&self) {
        let work = self.inner.work.lock().take();
        let Some(work) = work else {
            return;
        };

        tracing::trace!(task = %self.inner.id, "Running lazy task");
        let outcome = match catch_unwind(AssertUnwindSafe(work)) {
            Ok(outcome) => outcome,
            Err(payload) => Err(DispatchError::Task(format!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        // Only `run` publishes for lazy tasks, and only once.
        let _ = self.inner.outcome.set(outcome);
    }

    /// Force the task, block until it resolves, and move the outcome out
    ///
    /// Every handle of one task shares a single outcome: whichever caller
    /// resolves first gets it, later callers get
    /// [`DispatchError::ProtocolViolation`].
    pub fn resolve(&self) -> Result<A> {
        self.run();
        match self.inner.outcome.take() {
            Ok(outcome) => outcome,
            Err(err) => Err(err.into()),
        }
    }
}

impl<A> Task<A> {
    /// Identifier of this task
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Whether the outcome is known without blocking
    pub fn is_resolved(&self) -> bool {
        self.inner.outcome.is_set() || self.inner.outcome.is_abandoned()
    }

    /// Whether the task still waits to be forced
    pub fn is_lazy(&self) -> bool {
        self.inner.work.lock().is_some()
    }
}

impl<A> fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("outcome", &self.inner.outcome)
            .finish()
    }
}

/// Completion side of a promised [`Task`]
///
/// Dropping a promise without completing it resolves the task with
/// [`DispatchError::Abandoned`].
pub struct Promise<A> {
    inner: Option<Arc<Inner<A>>>,
}

impl<A> Promise<A> {
    /// Identifier of the task this promise completes
    pub fn id(&self) -> Option<TaskId> {
        self.inner.as_ref().map(|inner| inner.id)
    }

    /// Resolve the task with `value`
    pub fn complete(mut self, value: A) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.outcome.set(Ok(value));
        }
    }

    /// Resolve the task with a failure
    pub fn fail(mut self, error: DispatchError) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.outcome.set(Err(error));
        }
    }
}

impl<A> Drop for Promise<A> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tracing::debug!(task = %inner.id, "Promise dropped without a result");
            inner.outcome.abandon();
        }
    }
}

impl<A> fmt::Debug for Promise<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ready_task() {
        let task = Task::ready("done");
        assert!(task.is_resolved());
        assert!(!task.is_lazy());
        assert_eq!(task.resolve().unwrap(), "done");
    }

    #[test]
    fn test_failed_task() {
        let task: Task<u8> = Task::failed(DispatchError::task("no deck"));
        assert!(task.is_resolved());
        assert!(matches!(task.resolve(), Err(DispatchError::Task(_))));
    }

    #[test]
    fn test_lazy_task_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let task = Task::lazy(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(10)
        });

        assert!(task.is_lazy());
        assert!(!task.is_resolved());
        task.run();
        task.run();
        assert!(task.is_resolved());
        assert_eq!(task.resolve().unwrap(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_resolve_is_protocol_violation() {
        let task = Task::ready(1);
        let other_handle = task.clone();
        assert_eq!(task.resolve().unwrap(), 1);
        assert!(matches!(
            other_handle.resolve(),
            Err(DispatchError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_panicking_work_becomes_task_error() {
        let task: Task<u8> = Task::lazy(|| panic!("shuffle failed"));
        match task.resolve() {
            Err(DispatchError::Task(msg)) => assert!(msg.contains("shuffle failed")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_from_future() {
        let task = Task::from_future(async { Ok::<_, DispatchError>(5 * 5) });
        assert!(task.is_lazy());
        assert_eq!(task.resolve().unwrap(), 25);
    }

    #[test]
    fn test_promise_completed_from_another_thread() {
        let (task, promise) = Task::promise();
        assert_eq!(promise.id(), Some(task.id()));

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            promise.complete(String::from("card"));
        });
        assert_eq!(task.resolve().unwrap(), "card");
        handle.join().unwrap();
    }

    #[test]
    fn test_promise_fail() {
        let (task, promise) = Task::<u8>::promise();
        promise.fail(DispatchError::Custom("dealer left".into()));
        assert!(matches!(task.resolve(), Err(DispatchError::Custom(_))));
    }

    #[test]
    fn test_dropped_promise_abandons_task() {
        let (task, promise) = Task::<u8>::promise();
        drop(promise);
        assert!(task.is_resolved());
        assert!(matches!(task.resolve(), Err(DispatchError::Abandoned)));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Task::ready(());
        let b = Task::ready(());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }
}
