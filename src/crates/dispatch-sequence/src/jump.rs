//! Labeled jumps
//!
//! [`Jump::label`] registers a step under a label each time it runs, remembering
//! the input it received and the continuation it was handed. Any continuation
//! wrapped by the same [`Jump`] (through `apply`, `label` or `run`) that receives
//! [`Signal::Jump`] for a registered label replays that step with its original
//! input instead of continuing downstream. Unknown labels travel on downstream;
//! if nothing claims them, the terminal continuation panics with
//! `LabelNotFound`.
//!
//! # Example
//!
//! ```rust
//! use dispatch_sequence::{Jump, Next, Runner, Sequence};
//! use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let jump = Jump::new();
//! let setups = Arc::new(AtomicUsize::new(0));
//! let reset = Arc::new(AtomicBool::new(true));
//!
//! let counter = setups.clone();
//! let pending_reset = reset.clone();
//! Sequence::of(|(), next: Next<u32>| next.resume(1))
//!     .pipe(jump.label("setup", move |x: u32, next: Next<u32>| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         next.resume(x);
//!     }))
//!     .pipe(jump.apply(move |x: u32, next: Next<u32>| {
//!         if pending_reset.swap(false, Ordering::SeqCst) {
//!             next.jump("setup");
//!         } else {
//!             next.resume(x);
//!         }
//!     }))
//!     .begin(|x| assert_eq!(x, 1));
//!
//! assert_eq!(setups.load(Ordering::SeqCst), 2);
//! ```

use crate::next::{Label, Next, Signal};
use crate::runner::{PassThrough, Runner};
use crate::step::{step, Step, StepFn};
use dashmap::DashMap;
use std::sync::Arc;

type Replay = Arc<dyn Fn() + Send + Sync>;
type Table = Arc<DashMap<Label, Replay>>;

/// Runner adding labeled jump targets on top of a delegate runner
pub struct Jump<R = PassThrough> {
    delegate: Arc<R>,
    table: Table,
}

impl<R> Clone for Jump<R> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            table: self.table.clone(),
        }
    }
}

impl Jump<PassThrough> {
    /// Jumps without relocation
    pub fn new() -> Self {
        Self::with(PassThrough)
    }
}

impl Default for Jump<PassThrough> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runner> Jump<R> {
    /// Jumps on top of `delegate`, which decides where steps run
    pub fn with(delegate: R) -> Self {
        Self {
            delegate: Arc::new(delegate),
            table: Arc::new(DashMap::new()),
        }
    }

    /// Whether a step has registered under `label`
    pub fn is_registered(&self, label: impl Into<Label>) -> bool {
        self.table.contains_key(&label.into())
    }

    /// Drop the registration for `label`
    pub fn forget(&self, label: impl Into<Label>) -> bool {
        self.table.remove(&label.into()).is_some()
    }

    /// Register `s` as the jump target `key`
    ///
    /// Every run of the returned step refreshes the registration with the
    /// current input and continuation.
    pub fn label<I, O>(&self, key: impl Into<Label>, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Clone + Send + Sync + 'static,
        O: Send + 'static,
    {
        let key = key.into();
        let labeled = step(s);
        let relocated = self.delegate.apply(labeled.clone());
        let table = self.table.clone();
        self.apply(move |input: I, next: Next<O>| {
            let replay: Replay = {
                let relocated = relocated.clone();
                let input = input.clone();
                let next = next.clone();
                Arc::new(move || relocated.call(input.clone(), next.clone()))
            };
            table.insert(key.clone(), replay);
            labeled.call(input, next);
        })
    }
}

fn intercept<T: Send + 'static>(table: Table, next: Next<T>) -> Next<T> {
    Next::from_signal(move |signal| match signal {
        Signal::Value(value) => next.resume(value),
        Signal::Jump(label) => {
            // Clone out so the map shard is unlocked before the replay re-registers.
            let replay = table.get(&label).map(|entry| entry.value().clone());
            match replay {
                Some(replay) => {
                    tracing::debug!(label = %label, "Replaying labeled step");
                    replay();
                }
                None => next.jump(label),
            }
        }
    })
}

impl<R: Runner> Runner for Jump<R> {
    fn apply<I, O>(&self, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let table = self.table.clone();
        self.delegate
            .apply(move |input: I, next: Next<O>| s.call(input, intercept(table.clone(), next)))
    }

    fn run<T>(&self, next: Next<T>) -> Next<T>
    where
        T: Send + 'static,
    {
        self.delegate.run(intercept(self.table.clone(), next))
    }
}

impl<R> std::fmt::Debug for Jump<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jump")
            .field("labels", &self.table.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Sequence;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jump_replays_labeled_step_with_original_input() {
        let jump = Jump::new();
        let labeled_inputs = Arc::new(Mutex::new(Vec::new()));
        let after_jump = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(Mutex::new(Vec::new()));

        let inputs = labeled_inputs.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let skipped = after_jump.clone();
        let out = results.clone();

        Sequence::of(|(), next: Next<i32>| next.resume(5))
            .pipe(jump.label("early", move |x: i32, next: Next<i32>| {
                inputs.lock().push(x);
                next.resume(x * 10);
            }))
            .pipe(jump.apply(move |x: i32, next: Next<i32>| {
                // Reset once, on the first pass only.
                if a.fetch_add(1, Ordering::SeqCst) == 0 {
                    next.jump("early");
                } else {
                    next.resume(x + 1);
                }
            }))
            .pipe(move |x: i32, next: Next<i32>| {
                skipped.fetch_add(1, Ordering::SeqCst);
                next.resume(x);
            })
            .begin(move |x| out.lock().push(x));

        assert_eq!(*labeled_inputs.lock(), vec![5, 5]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // The step after the jumping one ran only on the second pass.
        assert_eq!(after_jump.load(Ordering::SeqCst), 1);
        assert_eq!(*results.lock(), vec![51]);
        assert!(jump.is_registered("early"));
    }

    #[test]
    fn test_terminal_run_intercepts_jumps() {
        let jump = Jump::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let results = Arc::new(Mutex::new(Vec::new()));
        let out = results.clone();

        // The jumping step is not wrapped; the terminal catches the jump instead.
        Sequence::of(|(), next: Next<u8>| next.resume(1))
            .pipe(jump.label("top", |x: u8, next: Next<u8>| next.resume(x)))
            .pipe(move |x: u8, next: Next<u8>| {
                if r.fetch_add(1, Ordering::SeqCst) < 2 {
                    next.jump("top");
                } else {
                    next.resume(x);
                }
            })
            .begin_with(jump.run(Next::new(move |x| out.lock().push(x))));

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(*results.lock(), vec![1]);
    }

    #[test]
    #[should_panic(expected = "Jump target 'nowhere' is not registered")]
    fn test_unknown_label_fails_loudly() {
        let jump = Jump::new();
        Sequence::of(|(), next: Next<u8>| next.resume(1))
            .pipe(jump.apply(|_: u8, next: Next<u8>| next.jump("nowhere")))
            .begin(|_| {});
    }

    #[test]
    fn test_forget_unregisters() {
        let jump = Jump::new();
        let s = jump.label("x", |v: u8, next: Next<u8>| next.resume(v));
        s.call(1, Next::new(|_| {}));
        assert!(jump.is_registered("x"));
        assert!(jump.forget("x"));
        assert!(!jump.is_registered("x"));
    }
}
