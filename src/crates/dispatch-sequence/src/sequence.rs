//! Sequences: replayable pipelines of continuation-passing steps
//!
//! A [`Sequence`] is built lazily from a head block and any number of piped
//! steps. Nothing runs until [`Sequence::begin`]; every `begin` replays the
//! whole chain from the head, and no step result is cached by the sequence
//! itself (wrap a step with [`Memoize`](crate::Memoize) for that).
//!
//! A step that does not call its continuation ends the pipeline right there.
//! This is how conditional short-circuits are written; it is not an error.
//!
//! # Example
//!
//! ```rust
//! use dispatch_sequence::{Next, Sequence};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//!
//! let pipeline = Sequence::of(|(), next: Next<i32>| next.resume(4))
//!     .map(|x| x * x)
//!     .pipe(|x: i32, next: Next<String>| {
//!         if x > 10 {
//!             next.resume(format!("big {}", x));
//!         }
//!     });
//!
//! pipeline.begin(move |s| sink.lock().unwrap().push(s));
//! pipeline.begin(|_| {});
//! assert_eq!(*seen.lock().unwrap(), vec!["big 16".to_string()]);
//! ```

use crate::next::{Next, Signal};
use crate::step::{self, Step};
use std::sync::Arc;

/// Lazily built, replayable pipeline producing `O`
pub struct Sequence<O> {
    run: Arc<dyn Fn(Next<O>) + Send + Sync>,
}

impl<O> Clone for Sequence<O> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
        }
    }
}

impl<O: 'static> Sequence<O> {
    /// Start a pipeline with a block producing the first value
    pub fn of(block: impl Step<(), O>) -> Self {
        Self {
            run: Arc::new(move |next: Next<O>| block.call((), next)),
        }
    }

    /// Append a step receiving this pipeline's value
    ///
    /// Jumps raised upstream pass this step by and keep travelling downstream.
    pub fn pipe<P: 'static>(self, s: impl Step<O, P>) -> Sequence<P> {
        let prev = self.run;
        let s = step::step(s);
        Sequence {
            run: Arc::new(move |next: Next<P>| {
                let s = s.clone();
                prev(Next::from_signal(move |signal| match signal {
                    Signal::Value(value) => s.call(value, next.clone()),
                    Signal::Jump(label) => next.jump(label),
                }));
            }),
        }
    }

    /// Append a step that always continues with `f(value)`
    pub fn map<P, F>(self, f: F) -> Sequence<P>
    where
        P: 'static,
        F: Fn(O) -> P + Send + Sync + 'static,
    {
        self.pipe(step::map(f))
    }

    /// Run the whole pipeline, delivering the final value to `terminal`
    pub fn begin<F>(&self, terminal: F)
    where
        F: Fn(O) + Send + Sync + 'static,
    {
        self.begin_with(Next::new(terminal));
    }

    /// Run the whole pipeline into an existing continuation
    ///
    /// Use this with a runner's `run` to relocate or intercept the terminal.
    pub fn begin_with(&self, next: Next<O>) {
        (self.run)(next);
    }
}

impl<O> std::fmt::Debug for Sequence<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").finish_non_exhaustive()
    }
}
