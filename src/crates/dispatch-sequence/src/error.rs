//! Error types for latches and continuation pipelines
//!
//! Blocking reads distinguish a delivered value from every way a wait can end
//! without one. `LabelNotFound` is a programmer error: pipelines raise it as a
//! panic message rather than returning it, but the variant exists so the text is
//! consistent wherever the condition is reported.

use crate::next::Label;
use thiserror::Error;

/// Convenience result type using [`SequenceError`]
pub type Result<T> = std::result::Result<T, SequenceError>;

/// Errors raised by [`Latch`](crate::Latch) and the runner policies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// The waiting thread was interrupted before a value arrived
    #[error("Wait interrupted before a value was published")]
    Interrupted,

    /// The producer went away without publishing a value
    #[error("Producer abandoned the latch without publishing a value")]
    Abandoned,

    /// A bounded wait elapsed
    #[error("Wait timed out after {duration_ms}ms")]
    Timeout {
        /// Bound that elapsed, in milliseconds
        duration_ms: u64,
    },

    /// A second value was offered to a single-set latch
    #[error("Latch value was already published")]
    AlreadySet,

    /// The published value was already moved out by `take`
    #[error("Latch value was already taken")]
    AlreadyTaken,

    /// A jump targeted a label nobody registered
    #[error("Jump target '{0}' is not registered")]
    LabelNotFound(Label),
}

impl SequenceError {
    /// True for outcomes that mean "the wait was cancelled", as opposed to a
    /// misuse of the latch.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            SequenceError::Interrupted | SequenceError::Abandoned | SequenceError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SequenceError::LabelNotFound(Label::from("setup"));
        assert_eq!(err.to_string(), "Jump target 'setup' is not registered");

        let err = SequenceError::Timeout { duration_ms: 250 };
        assert_eq!(err.to_string(), "Wait timed out after 250ms");
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(SequenceError::Interrupted.is_cancellation());
        assert!(SequenceError::Abandoned.is_cancellation());
        assert!(SequenceError::Timeout { duration_ms: 1 }.is_cancellation());
        assert!(!SequenceError::AlreadySet.is_cancellation());
        assert!(!SequenceError::AlreadyTaken.is_cancellation());
    }
}
