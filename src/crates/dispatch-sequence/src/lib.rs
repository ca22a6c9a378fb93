//! # dispatch-sequence - Continuation pipelines with pluggable execution contexts
//!
//! Build asynchronous workflows out of small continuation-passing steps and
//! decide, per step, where and how each one runs.
//!
//! ## Core Concepts
//!
//! ### 1. Steps and continuations
//!
//! A [`Step`] receives a value and a [`Next`] continuation. It may continue
//! right away, hand the continuation to another thread, request a jump with
//! [`Next::jump`], or not continue at all. Values and jump requests travel
//! together as a [`Signal`], so no ambient thread-local state is involved.
//!
//! ### 2. Sequences
//!
//! A [`Sequence`] chains steps lazily: `of(block)`, then `pipe(step)` as often
//! as needed, then `begin(terminal)`. Every `begin` replays the whole chain.
//!
//! ### 3. Runners
//!
//! A [`Runner`] decorates steps and terminals:
//!
//! - [`PassThrough`] - run in place
//! - [`Context`] - run inside an [`Executor`] ([`SerialExecutor`],
//!   [`TokioContext`], [`Inline`])
//! - [`Interleave`] - produce on a worker, deliver on a main context
//! - [`Memoize`] - run a labeled step at most once per key
//! - [`Jump`] - restart from an earlier labeled step
//!
//! ### 4. Supporting values
//!
//! - [`Latch`] - single-set-once value with interruptible, abandonable waits
//! - [`Binding`] - weak reference whose dispatch becomes a no-op once the
//!   target is gone
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_sequence::{Context, Interleave, Latch, Next, Runner, Sequence};
//! use std::sync::Arc;
//!
//! let runner = Interleave::new(Context::serial("worker"), Context::serial("main"));
//! let done = Arc::new(Latch::new());
//! let publish = done.clone();
//!
//! Sequence::of(runner.apply(|(), next: Next<u64>| next.resume((1..=10).sum())))
//!     .map(|total| total * 2)
//!     .begin(move |total| {
//!         let _ = publish.set(total);
//!     });
//!
//! assert_eq!(done.wait(), Ok(110));
//! ```

pub mod binding;
pub mod context;
pub mod error;
pub mod jump;
pub mod latch;
pub mod memoize;
pub mod next;
pub mod runner;
pub mod sequence;
pub mod step;

pub use binding::Binding;
pub use context::{panic_message, Executor, Inline, Job, SerialExecutor, TokioContext};
pub use error::{Result, SequenceError};
pub use jump::Jump;
pub use latch::Latch;
pub use memoize::{Memo, MemoStore, MemoTable, Memoize};
pub use next::{Label, Next, Signal};
pub use runner::{Context, Interleave, PassThrough, Runner};
pub use sequence::Sequence;
pub use step::{filter, map, step, BlockFn, Step, StepFn};
