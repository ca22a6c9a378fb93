//! Execution contexts
//!
//! An [`Executor`] is somewhere a job can run: the calling thread, one dedicated
//! thread, or a tokio blocking pool. Runners use [`Executor::is_current`] to call
//! through directly when the caller is already inside the target context and to
//! post otherwise.
//!
//! # Example
//!
//! ```rust
//! use dispatch_sequence::context::{Executor, SerialExecutor};
//! use std::sync::mpsc;
//!
//! let main = SerialExecutor::spawn("main");
//! let (tx, rx) = mpsc::channel();
//! main.execute(Box::new(move || {
//!     tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
//! }));
//! assert_eq!(rx.recv().unwrap().as_deref(), Some("main"));
//! ```

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;

/// A unit of work handed to an [`Executor`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere jobs run
pub trait Executor: Send + Sync + 'static {
    /// Run `job` inside this context. May return before the job has run.
    fn execute(&self, job: Job);

    /// Whether the calling thread already belongs to this context
    fn is_current(&self) -> bool {
        false
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }

    fn is_current(&self) -> bool {
        (**self).is_current()
    }
}

/// Runs every job on the calling thread, immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job();
    }

    fn is_current(&self) -> bool {
        true
    }
}

/// One dedicated, named thread running jobs in submission order
///
/// This is the usual synchronization context: everything posted to it is
/// serialized. A job that panics stops the executor: the panic is logged, jobs
/// still queued are dropped, and the panic is raised again on the next thread
/// that calls [`flush`](Self::flush) or [`shutdown`](Self::shutdown) (or drops
/// the last handle). Dropping the executor closes the queue and joins the
/// thread after the jobs already submitted have run.
pub struct SerialExecutor {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    poison: Arc<Mutex<Option<String>>>,
    raised: AtomicBool,
}

impl SerialExecutor {
    /// Spawn the backing thread and return a shareable handle
    pub fn spawn(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let poison = Arc::new(Mutex::new(None));

        let thread_poison = poison.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(
                            executor = %thread_name,
                            panic = %message,
                            "Job panicked, serial executor stops"
                        );
                        *thread_poison.lock() = Some(message);
                        return;
                    }
                }
                tracing::debug!(executor = %thread_name, "Serial executor drained");
            })
            .unwrap_or_else(|e| panic!("failed to spawn serial executor thread '{}': {}", name, e));

        Arc::new(Self {
            thread_id: handle.thread().id(),
            name,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            poison,
            raised: AtomicBool::new(false),
        })
    }

    /// Thread name of this executor
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message of the job panic that stopped the executor, if any
    pub fn panicked(&self) -> Option<String> {
        self.poison.lock().clone()
    }

    /// Block until every job submitted before this call has run
    ///
    /// Returns immediately when called from the executor's own thread.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a job that stopped the executor, once.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.execute(Box::new(move || {
            let _ = tx.send(());
        }));
        // A closed queue drops the marker job, which also ends the wait.
        let _ = rx.recv();
        self.raise();
    }

    /// Stop accepting jobs, let queued ones finish, and join the thread
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a job that stopped the executor, unless it was
    /// already raised or the caller is unwinding.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!(executor = %self.name, "Serial executor thread terminated abnormally");
            }
        }
        if !thread::panicking() {
            self.raise();
        }
    }

    fn raise(&self) {
        let Some(message) = self.panicked() else {
            return;
        };
        if !self.raised.swap(true, Ordering::SeqCst) {
            panic!("serial executor '{}' stopped: {}", self.name, message);
        }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, job: Job) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                if tx.send(job).is_err() {
                    tracing::warn!(executor = %self.name, "Serial executor queue closed; job dropped");
                }
            }
            None => {
                tracing::warn!(executor = %self.name, "Serial executor shut down; job dropped");
            }
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .field("panicked", &self.panicked().is_some())
            .finish()
    }
}

/// Worker context backed by a tokio runtime's blocking pool
///
/// Jobs may block (on a latch, a backlog, a future driven to completion), so
/// they go through `spawn_blocking` rather than onto the async workers.
#[derive(Debug, Clone)]
pub struct TokioContext {
    handle: tokio::runtime::Handle,
}

impl TokioContext {
    /// Wrap an existing runtime handle
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is currently inside, if any
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }

    /// The wrapped runtime handle
    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }
}

impl Executor for TokioContext {
    fn execute(&self, job: Job) {
        // Detached: the job owns whatever it needs to report completion.
        drop(self.handle.spawn_blocking(job));
    }
}

/// Text of a panic payload caught with `catch_unwind`
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        Inline.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(Inline.is_current());
    }

    #[test]
    fn test_serial_executor_preserves_order() {
        let exec = SerialExecutor::spawn("serial-order");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            exec.execute(Box::new(move || seen.lock().push(i)));
        }
        exec.flush();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_executor_is_current_only_on_its_thread() {
        let exec = SerialExecutor::spawn("serial-current");
        assert!(!exec.is_current());

        let (tx, rx) = std_mpsc::channel();
        let inner = exec.clone();
        exec.execute(Box::new(move || {
            tx.send(inner.is_current()).unwrap();
        }));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_panicking_job_stops_serial_executor() {
        let exec = SerialExecutor::spawn("serial-panic");
        exec.execute(Box::new(|| panic!("boom")));

        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        exec.execute(Box::new(move || r.store(true, Ordering::SeqCst)));

        let raised = std::panic::catch_unwind(AssertUnwindSafe(|| exec.flush()));
        let message = panic_message(raised.unwrap_err().as_ref());
        assert!(message.contains("serial executor 'serial-panic' stopped: boom"));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(exec.panicked().as_deref(), Some("boom"));

        // Raised once; later calls return quietly.
        exec.flush();
        exec.shutdown();
    }

    #[test]
    #[should_panic(expected = "serial executor 'serial-shutdown-panic' stopped: late failure")]
    fn test_shutdown_raises_job_panic() {
        let exec = SerialExecutor::spawn("serial-shutdown-panic");
        exec.execute(Box::new(|| panic!("late failure")));
        exec.shutdown();
    }

    #[test]
    fn test_serial_executor_drops_jobs_after_shutdown() {
        let exec = SerialExecutor::spawn("serial-shutdown");
        exec.shutdown();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        exec.execute(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tokio_context_runs_on_blocking_pool() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tokio-ctx")
            .build()
            .unwrap();
        let ctx = TokioContext::new(rt.handle().clone());

        let (tx, rx) = std_mpsc::channel();
        ctx.execute(Box::new(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("tokio-ctx"));
        assert!(!ctx.is_current());
    }

    #[tokio::test]
    async fn test_tokio_context_current() {
        assert!(TokioContext::current().is_some());
    }
}
