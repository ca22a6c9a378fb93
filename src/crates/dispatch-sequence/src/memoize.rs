//! Once-only steps
//!
//! [`Memoize::label`] wraps a step so that, for a given key, it runs at most once
//! for the lifetime of the backing [`MemoStore`]. The first caller runs the step
//! and blocks on a [`Latch`] until the step publishes its value; every other
//! caller, on any thread, blocks on the same latch and continues with a clone of
//! the cached value.
//!
//! The first caller blocks, so a memoized step must not deliver its value
//! through the very thread that invoked it.
//!
//! A first run that ends without answering (every clone of its continuation
//! dropped, as a filtering step does) abandons the key: all callers stop there.
//! A first run that panics abandons the key, forgets it so a later call runs
//! the step again, and resumes the panic on the calling thread.
//!
//! # Example
//!
//! ```rust
//! use dispatch_sequence::{Memoize, Next, Step};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let runs = Arc::new(AtomicUsize::new(0));
//! let counter = runs.clone();
//! let memo = Memoize::new();
//! let config = memo.label("config", move |(), next: Next<String>| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     next.resume("loaded".to_string());
//! });
//!
//! config.call((), Next::new(|_| {}));
//! config.call((), Next::new(|v| assert_eq!(v, "loaded")));
//! assert_eq!(runs.load(Ordering::SeqCst), 1);
//! ```

use crate::context::panic_message;
use crate::latch::Latch;
use crate::next::{Label, Next, Signal};
use crate::runner::Runner;
use crate::step::{step, Step, StepFn};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Type-erased memoized value
pub type Memo = Arc<dyn Any + Send + Sync>;

/// Backing store for memoized values
pub trait MemoStore: Send + Sync + 'static {
    /// Latch for `key`, plus `true` when this call created it (and so owns
    /// running the step)
    fn slot(&self, key: &Label) -> (Arc<Latch<Memo>>, bool);

    /// Drop the entry for `key`; the next call runs the step again
    fn forget(&self, key: &Label) -> bool;

    /// Drop every entry
    fn clear(&self);

    /// Whether `key` has an entry (published or still running)
    fn contains(&self, key: &Label) -> bool;
}

/// Concurrent in-memory [`MemoStore`]
#[derive(Default)]
pub struct MemoTable {
    slots: DashMap<Label, Arc<Latch<Memo>>>,
}

impl MemoTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table holds no key
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl MemoStore for MemoTable {
    fn slot(&self, key: &Label) -> (Arc<Latch<Memo>>, bool) {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let latch = Arc::new(Latch::new());
                entry.insert(latch.clone());
                (latch, true)
            }
        }
    }

    fn forget(&self, key: &Label) -> bool {
        self.slots.remove(key).is_some()
    }

    fn clear(&self) {
        self.slots.clear();
    }

    fn contains(&self, key: &Label) -> bool {
        self.slots.contains_key(key)
    }
}

/// Runner whose labeled steps run at most once per key
///
/// As a plain runner (`apply`/`run`) it changes nothing.
pub struct Memoize<S = MemoTable> {
    store: Arc<S>,
}

impl<S> Clone for Memoize<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl Memoize<MemoTable> {
    /// Memoize into a fresh in-memory table
    pub fn new() -> Self {
        Self::with_store(MemoTable::new())
    }
}

impl Default for Memoize<MemoTable> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemoStore> Memoize<S> {
    /// Memoize into `store`
    pub fn with_store(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether `key` has been claimed by a run
    pub fn contains(&self, key: impl Into<Label>) -> bool {
        self.store.contains(&key.into())
    }

    /// Forget the value for `key`
    pub fn forget(&self, key: impl Into<Label>) -> bool {
        self.store.forget(&key.into())
    }

    /// Forget every value
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Wrap `s` so it runs at most once for `key`
    ///
    /// # Panics
    ///
    /// Continuing with a value panics if the same key was memoized with a
    /// different output type.
    pub fn label<I, O>(&self, key: impl Into<Label>, s: impl Step<I, O>) -> StepFn<I, O>
    where
        I: Send + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let key = key.into();
        let store = self.store.clone();
        step(move |input: I, next: Next<O>| {
            let (latch, first) = store.slot(&key);
            if first {
                tracing::debug!(key = %key, "Running memoized step");
                let answer = Unanswered(latch.clone());
                let jump_to = next.clone();
                let memo_key = key.clone();
                let run = catch_unwind(AssertUnwindSafe(|| {
                    s.call(
                        input,
                        Next::from_signal(move |signal| match signal {
                            Signal::Value(value) => {
                                if answer.0.set(Arc::new(value) as Memo).is_err() {
                                    tracing::warn!(
                                        key = %memo_key,
                                        "Memoized step answered more than once; keeping the first value"
                                    );
                                }
                            }
                            Signal::Jump(label) => {
                                answer.0.abandon();
                                jump_to.jump(label);
                            }
                        }),
                    )
                }));
                if let Err(payload) = run {
                    latch.abandon();
                    store.forget(&key);
                    tracing::warn!(
                        key = %key,
                        panic = %panic_message(payload.as_ref()),
                        "Memoized step panicked; entry forgotten"
                    );
                    resume_unwind(payload);
                }
            }
            match latch.wait() {
                Ok(memo) => match memo.downcast::<O>() {
                    Ok(value) => next.resume(O::clone(&value)),
                    Err(_) => panic!(
                        "memoized value for '{}' was stored with a different type",
                        key
                    ),
                },
                // The first caller already forwarded the jump that abandoned it.
                Err(e) if first => {
                    tracing::debug!(key = %key, error = %e, "Memoized step did not publish");
                }
                Err(e) => {
                    tracing::debug!(
                        key = %key,
                        error = %e,
                        "Memoized value unavailable; pipeline stops here"
                    );
                }
            }
        })
    }
}

/// Abandons the latch once the first run's continuation is gone unanswered
struct Unanswered(Arc<Latch<Memo>>);

impl Drop for Unanswered {
    fn drop(&mut self) {
        // No-op when a value was published.
        self.0.abandon();
    }
}

impl<S: MemoStore> Runner for Memoize<S> {
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

impl<S> std::fmt::Debug for Memoize<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoize").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn counting_step(runs: Arc<AtomicUsize>) -> impl Step<(), u64> {
        move |(), next: Next<u64>| {
            let n = runs.fetch_add(1, Ordering::SeqCst) as u64;
            next.resume(100 + n);
        }
    }

    #[test]
    fn test_label_runs_once_per_key() {
        let runs = Arc::new(AtomicUsize::new(0));
        let memo = Memoize::new();
        let s = memo.label("k", counting_step(runs.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let seen = seen.clone();
            s.call((), Next::new(move |v| seen.lock().push(v)));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![100, 100, 100]);
        assert!(memo.contains("k"));
    }

    #[test]
    fn test_label_at_most_once_across_threads() {
        let runs = Arc::new(AtomicUsize::new(0));
        let memo = Memoize::new();
        let slow_runs = runs.clone();
        let s = memo.label("shared", move |(), next: Next<u64>| {
            slow_runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            next.resume(7);
        });

        let callers = 8;
        let barrier = Arc::new(Barrier::new(callers));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let s = s.clone();
                let barrier = barrier.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    barrier.wait();
                    s.call((), Next::new(move |v| seen.lock().push(v)));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![7; callers]);
    }

    #[test]
    fn test_distinct_keys_run_separately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let memo = Memoize::new();
        let a = memo.label("a", counting_step(runs.clone()));
        let b = memo.label("b", counting_step(runs.clone()));

        a.call((), Next::new(|_| {}));
        b.call((), Next::new(|_| {}));
        a.call((), Next::new(|_| {}));

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(memo.store().len(), 2);
    }

    #[test]
    fn test_forget_allows_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let memo = Memoize::new();
        let s = memo.label("k", counting_step(runs.clone()));

        s.call((), Next::new(|_| {}));
        assert!(memo.forget("k"));
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        s.call((), Next::new(move |v| *slot.lock() = Some(v)));

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock(), Some(101));

        memo.clear();
        assert!(memo.store().is_empty());
    }

    #[test]
    fn test_jump_from_memoized_step_is_forwarded() {
        let memo = Memoize::new();
        let s = memo.label("k", |(), next: Next<u8>| next.jump("restart"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.call((), Next::from_signal(move |signal| sink.lock().push(signal)));

        assert_eq!(*seen.lock(), vec![Signal::Jump(Label::from("restart"))]);

        // Later callers find the slot abandoned and stop quietly.
        let later = Arc::new(AtomicUsize::new(0));
        let l = later.clone();
        s.call(
            (),
            Next::new(move |_| {
                l.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_short_circuiting_first_run_abandons_key() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let memo = Memoize::new();
        let positive = memo.label("positive", move |x: i32, next: Next<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            if x > 0 {
                next.resume(x);
            }
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let caller = {
            let positive = positive.clone();
            thread::spawn(move || {
                positive.call(0, Next::new(|_| {}));
                tx.send(()).unwrap();
            })
        };
        rx.recv_timeout(std::time::Duration::from_secs(2))
            .expect("first caller returned");
        caller.join().unwrap();

        // The key stays claimed; later callers stop without running the step.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        positive.call(5, Next::new(move |v| sink.lock().push(v)));
        assert!(seen.lock().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(memo.contains("positive"));
    }

    #[test]
    fn test_continuation_kept_elsewhere_still_publishes() {
        let memo = Memoize::new();
        let s = memo.label("deferred", |(), next: Next<u8>| {
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(10));
                next.resume(9);
            });
        });

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        s.call((), Next::new(move |v| *slot.lock() = Some(v)));
        assert_eq!(*seen.lock(), Some(9));
    }

    #[test]
    fn test_panicking_first_run_is_forgotten() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let memo = Memoize::new();
        let flaky = memo.label("flaky", move |(), next: Next<u32>| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("deck unavailable");
            }
            next.resume(52);
        });

        let first = std::panic::catch_unwind(AssertUnwindSafe(|| {
            flaky.call((), Next::new(|_| {}));
        }));
        assert!(first.is_err());
        assert!(!memo.contains("flaky"));

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        flaky.call((), Next::new(move |v| *slot.lock() = Some(v)));
        assert_eq!(*seen.lock(), Some(52));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_waiter_released_when_first_run_panics() {
        let memo = Memoize::new();
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let release = Arc::new(Barrier::new(2));
        let gate = release.clone();
        let started_tx = Mutex::new(started_tx);
        let calls = AtomicUsize::new(0);
        let s = memo.label("slow", move |(), next: Next<u8>| {
            if calls.fetch_add(1, Ordering::SeqCst) > 0 {
                next.resume(1);
                return;
            }
            started_tx.lock().send(()).unwrap();
            gate.wait();
            panic!("gave up");
        });

        let first = {
            let s = s.clone();
            thread::spawn(move || s.call((), Next::new(|_| {})))
        };
        started_rx.recv().unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let waiter = {
            let s = s.clone();
            thread::spawn(move || {
                s.call((), Next::new(|_| {}));
                done_tx.send(()).unwrap();
            })
        };
        // Let the waiter reach the latch before the first run fails.
        thread::sleep(std::time::Duration::from_millis(20));
        release.wait();

        assert!(first.join().is_err());
        done_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("waiter released");
        waiter.join().unwrap();
    }
}
