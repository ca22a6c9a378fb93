//! Continuations
//!
//! A step hands its result to a [`Next`]. Besides a plain value, a continuation
//! can carry a request to jump back to a labeled step: both travel as a
//! [`Signal`], so a jump is part of the value flowing through the pipeline and
//! survives hand-offs between threads.

use crate::error::SequenceError;
use std::fmt;
use std::sync::Arc;

/// Name of a labeled step or memoized result
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(Arc<str>);

impl Label {
    /// Create a label from any string
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Label text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({:?})", &*self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Label {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&Label> for Label {
    fn from(label: &Label) -> Self {
        label.clone()
    }
}

/// What a step hands to its continuation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<T> {
    /// Continue downstream with a value
    Value(T),
    /// Abandon this path and resume at the step registered under the label
    Jump(Label),
}

impl<T> Signal<T> {
    /// Carry a jump over to a continuation of another value type
    ///
    /// Returns the value back when this is not a jump.
    pub fn into_jump<U>(self) -> std::result::Result<Signal<U>, T> {
        match self {
            Signal::Value(v) => Err(v),
            Signal::Jump(label) => Ok(Signal::Jump(label)),
        }
    }
}

/// Clonable continuation receiving a [`Signal`]
///
/// Clones share the same underlying callback. Steps normally call their
/// continuation once; a step that never calls it ends the pipeline there.
pub struct Next<T> {
    f: Arc<dyn Fn(Signal<T>) + Send + Sync>,
}

impl<T> Clone for Next<T> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<T: 'static> Next<T> {
    /// Terminal continuation that only accepts values
    ///
    /// # Panics
    ///
    /// Receiving a jump panics with [`SequenceError::LabelNotFound`]: by the time
    /// a jump reaches a plain continuation, no runner along the way knew the
    /// label.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::from_signal(move |signal| match signal {
            Signal::Value(value) => f(value),
            Signal::Jump(label) => panic!("{}", SequenceError::LabelNotFound(label)),
        })
    }

    /// Continuation that sees jumps as well as values
    pub fn from_signal<F>(f: F) -> Self
    where
        F: Fn(Signal<T>) + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Continue with a value
    pub fn resume(&self, value: T) {
        (self.f)(Signal::Value(value));
    }

    /// Request a jump to the step registered under `label`
    pub fn jump(&self, label: impl Into<Label>) {
        (self.f)(Signal::Jump(label.into()));
    }

    /// Forward a signal unchanged
    pub fn send(&self, signal: Signal<T>) {
        (self.f)(signal);
    }

    /// Continuation that accepts `U`, converts it, and forwards here
    pub fn contramap<U, F>(self, f: F) -> Next<U>
    where
        U: 'static,
        T: Send + 'static,
        F: Fn(U) -> T + Send + Sync + 'static,
    {
        Next::from_signal(move |signal| match signal {
            Signal::Value(v) => self.resume(f(v)),
            Signal::Jump(label) => self.jump(label),
        })
    }
}

impl<T> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_label_conversions() {
        let a = Label::from("setup");
        let b = Label::from(String::from("setup"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "setup");
        assert_eq!(a.to_string(), "setup");
    }

    #[test]
    fn test_next_resume_and_clone_share_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let next = Next::new(move |v: i32| s.lock().push(v));

        next.resume(1);
        next.clone().resume(2);

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_from_signal_sees_jumps() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let next = Next::<i32>::from_signal(move |signal| s.lock().push(signal));

        next.resume(7);
        next.jump("again");

        assert_eq!(
            *seen.lock(),
            vec![Signal::Value(7), Signal::Jump(Label::from("again"))]
        );
    }

    #[test]
    #[should_panic(expected = "Jump target 'missing' is not registered")]
    fn test_plain_next_panics_on_unknown_jump() {
        let next = Next::new(|_: ()| {});
        next.jump("missing");
    }

    #[test]
    fn test_contramap_converts_values_and_keeps_jumps() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let next = Next::<String>::from_signal(move |signal| s.lock().push(signal));
        let lengths = next.contramap(|n: usize| format!("len={}", n));

        lengths.resume(3);
        lengths.jump("top");

        assert_eq!(
            *seen.lock(),
            vec![
                Signal::Value("len=3".to_string()),
                Signal::Jump(Label::from("top"))
            ]
        );
    }

    #[test]
    fn test_signal_into_jump() {
        let jump: Signal<i32> = Signal::Jump(Label::from("x"));
        assert_eq!(jump.into_jump::<String>(), Ok(Signal::Jump(Label::from("x"))));

        let value: Signal<i32> = Signal::Value(5);
        assert_eq!(value.into_jump::<String>(), Err(5));
    }
}
