//! Runners: decorators deciding where and how a step runs
//!
//! A [`Runner`] wraps a step (`apply`) or a terminal continuation (`run`). The
//! built-in relocation policies are:
//!
//! - [`PassThrough`] - identity, the step runs wherever it is called
//! - [`Context`] - run inside an [`Executor`], calling through directly when the
//!   caller is already there
//! - [`Interleave`] - produce under one runner, deliver under another
//!
//! [`Memoize`](crate::Memoize) and [`Jump`](crate::Jump) are runners too; they
//! change behavior rather than location.
//!
//! # Example
//!
//! ```rust
//! use dispatch_sequence::{step, Context, Interleave, Next, Runner, Sequence, SerialExecutor};
//! use std::sync::mpsc;
//!
//! let worker = Context::new(SerialExecutor::spawn("worker"));
//! let main = Context::new(SerialExecutor::spawn("main"));
//! let runner = Interleave::new(worker, main);
//!
//! let (tx, rx) = mpsc::channel();
//! let tx = std::sync::Mutex::new(tx);
//! Sequence::of(runner.apply(step(|(), next: Next<u32>| next.resume(6 * 7))))
//!     .begin(move |answer| tx.lock().unwrap().send(answer).unwrap());
//!
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```

use crate::context::{Executor, SerialExecutor};
use crate::next::Next;
use crate::step::{step, Step, StepFn};
use std::sync::Arc;

/// Decorator relocating or modifying how steps and continuations run
pub trait Runner: Send + Sync + 'static {
    /// Wrap a step so it runs under this runner's policy
    fn apply<I, O>(&self, step: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Send + 'static;

    /// Wrap a terminal continuation so it runs under this runner's policy
    fn run<T>(&self, next: Next<T>) -> Next<T>
    where
        T: Send + 'static;
}

impl<R: Runner> Runner for Arc<R> {
    fn apply<I, O>(&self, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        (**self).apply(s)
    }

    fn run<T>(&self, next: Next<T>) -> Next<T>
    where
        T: Send + 'static,
    {
        (**self).run(next)
    }
}

/// Identity runner
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Runner for PassThrough {
    fn apply<I, O>(&self, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        step(s)
    }

    fn run<T>(&self, next: Next<T>) -> Next<T>
    where
        T: Send + 'static,
    {
        next
    }
}

/// Runs steps and continuations inside an [`Executor`]
///
/// If the caller already runs inside the executor the call goes straight
/// through; otherwise it is posted and the caller returns immediately.
#[derive(Clone)]
pub struct Context {
    executor: Arc<dyn Executor>,
}

impl Context {
    /// Relocate onto `executor`
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Relocate onto a fresh dedicated thread named `name`
    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(SerialExecutor::spawn(name))
    }

    /// The executor steps are relocated to
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl Runner for Context {
    fn apply<I, O>(&self, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let inner = step(s);
        let executor = self.executor.clone();
        step(move |input: I, next: Next<O>| {
            if executor.is_current() {
                inner.call(input, next);
            } else {
                let inner = inner.clone();
                executor.execute(Box::new(move || inner.call(input, next)));
            }
        })
    }

    fn run<T>(&self, next: Next<T>) -> Next<T>
    where
        T: Send + 'static,
    {
        let executor = self.executor.clone();
        Next::from_signal(move |signal| {
            if executor.is_current() {
                next.send(signal);
            } else {
                let next = next.clone();
                executor.execute(Box::new(move || next.send(signal)));
            }
        })
    }
}

/// Produce under `worker`, deliver under `main`
///
/// The wrapped step runs under the worker runner, and the continuation it
/// receives is wrapped by the main runner, so whatever the step produces lands
/// on `main` no matter where it was computed.
#[derive(Debug, Clone)]
pub struct Interleave<W, M> {
    worker: W,
    main: Arc<M>,
}

impl<W: Runner, M: Runner> Interleave<W, M> {
    /// Combine a producing runner with a delivering one
    pub fn new(worker: W, main: M) -> Self {
        Self {
            worker,
            main: Arc::new(main),
        }
    }

    /// The runner producers run under
    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// The runner results are delivered under
    pub fn main(&self) -> &M {
        &self.main
    }
}

impl<W: Runner, M: Runner> Runner for Interleave<W, M> {
    fn apply<I, O>(&self, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let main = self.main.clone();
        self.worker
            .apply(move |input: I, next: Next<O>| s.call(input, main.run(next)))
    }

    fn run<T>(&self, next: Next<T>) -> Next<T>
    where
        T: Send + 'static,
    {
        self.main.run(next)
    }
}
