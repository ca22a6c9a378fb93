//! Pipeline steps
//!
//! A [`Step`] receives the previous result and a continuation. It may call the
//! continuation synchronously, hand it to another thread, request a jump, or not
//! call it at all (which quietly ends the pipeline).

use crate::next::Next;
use std::sync::Arc;

/// Continuation-passing step from `I` to `O`
pub trait Step<I, O>: Send + Sync + 'static {
    /// Run the step with its input and downstream continuation
    fn call(&self, input: I, next: Next<O>);
}

impl<I, O, F> Step<I, O> for F
where
    F: Fn(I, Next<O>) + Send + Sync + 'static,
{
    fn call(&self, input: I, next: Next<O>) {
        self(input, next)
    }
}

/// Shared, type-erased step
///
/// Cloning is cheap; every clone runs the same step.
pub struct StepFn<I, O>(Arc<dyn Step<I, O>>);

impl<I, O> Clone for StepFn<I, O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<I: 'static, O: 'static> Step<I, O> for StepFn<I, O> {
    fn call(&self, input: I, next: Next<O>) {
        self.0.call(input, next);
    }
}

impl<I, O> std::fmt::Debug for StepFn<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepFn").finish_non_exhaustive()
    }
}

/// Step producing `O` from nothing; the head of a sequence
pub type BlockFn<O> = StepFn<(), O>;

/// Erase a concrete step into a [`StepFn`]
pub fn step<I, O>(s: impl Step<I, O>) -> StepFn<I, O> {
    StepFn(Arc::new(s))
}

/// Step that always continues with `f(input)`
pub fn map<I, O, F>(f: F) -> StepFn<I, O>
where
    I: 'static,
    O: 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    step(move |input: I, next: Next<O>| next.resume(f(input)))
}

/// Step that continues only when `predicate` holds
pub fn filter<T, F>(predicate: F) -> StepFn<T, T>
where
    T: 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    step(move |input: T, next: Next<T>| {
        if predicate(&input) {
            next.resume(input);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collector<T: Send + 'static>() -> (Next<T>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        (Next::new(move |v| s.lock().push(v)), seen)
    }

    #[test]
    fn test_closure_is_a_step() {
        let double = step(|x: i32, next: Next<i32>| next.resume(x * 2));
        let (next, seen) = collector();
        double.call(21, next);
        assert_eq!(*seen.lock(), vec![42]);
    }

    #[test]
    fn test_map_step() {
        let describe = map(|x: i32| format!("#{}", x));
        let (next, seen) = collector();
        describe.call(3, next);
        assert_eq!(*seen.lock(), vec!["#3".to_string()]);
    }

    #[test]
    fn test_filter_short_circuits() {
        let even = filter(|x: &i32| x % 2 == 0);
        let (next, seen) = collector();
        even.call(1, next.clone());
        even.call(2, next);
        assert_eq!(*seen.lock(), vec![2]);
    }
}
