//! Error types for action dispatch
//!
//! Every failure the machine can observe is a [`DispatchError`]. Failed folds
//! and failed task resolutions are routed to the machine's
//! [`ErrorHandler`](crate::ErrorHandler); nothing is retried silently.
//!
//! # Error Hierarchy
//!
//! ```text
//! DispatchError
//! ├── Fold               - An action's fold returned an error
//! ├── Task               - Resolving an enqueued task failed
//! ├── Interrupted        - A blocking wait was interrupted
//! ├── Abandoned          - A task's producer went away without a result
//! ├── ProtocolViolation  - Misuse of the dispatch protocol
//! ├── Timeout            - A bounded wait elapsed
//! ├── Configuration      - Invalid or unreadable configuration
//! ├── Io                 - File access failed
//! ├── Serialization      - JSON/YAML decoding failed
//! └── Custom             - Application-defined errors
//! ```
//!
//! Unbalanced backlog accounting and unknown jump labels are programmer errors
//! and panic instead of producing a value of this type.
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::DispatchError;
//!
//! let err = DispatchError::fold("deal", "deck is empty");
//! assert_eq!(err.to_string(), "Action 'deal' fold failed: deck is empty");
//! assert!(!err.is_cancellation());
//! assert!(DispatchError::Interrupted.is_cancellation());
//! ```

use dispatch_sequence::SequenceError;
use thiserror::Error;

/// Convenience result type using [`DispatchError`]
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors produced while folding actions and resolving their follow-ups
#[derive(Error, Debug)]
pub enum DispatchError {
    /// An action's fold failed
    ///
    /// The machine keeps the state it had before the fold.
    #[error("Action '{action}' fold failed: {error}")]
    Fold {
        /// Name of the action that failed
        action: String,
        /// Error message from the fold
        error: String,
    },

    /// An enqueued task could not be resolved into an action
    #[error("Task resolution failed: {0}")]
    Task(String),

    /// A blocking wait was interrupted before its condition held
    #[error("Wait interrupted")]
    Interrupted,

    /// The producer of a task went away without completing it
    #[error("Task abandoned before it produced an action")]
    Abandoned,

    /// The dispatch protocol was used incorrectly
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A bounded wait elapsed
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON or YAML decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Application-defined error
    #[error("{0}")]
    Custom(String),
}

impl DispatchError {
    /// Create a fold error naming the failing action
    pub fn fold(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Fold {
            action: action.into(),
            error: error.into(),
        }
    }

    /// Create a task resolution error
    pub fn task(error: impl std::fmt::Display) -> Self {
        Self::Task(error.to_string())
    }

    /// True when the error means "cancelled" rather than "failed"
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            DispatchError::Interrupted | DispatchError::Abandoned | DispatchError::Timeout { .. }
        )
    }
}

impl From<SequenceError> for DispatchError {
    fn from(err: SequenceError) -> Self {
        match err {
            SequenceError::Interrupted => DispatchError::Interrupted,
            SequenceError::Abandoned => DispatchError::Abandoned,
            SequenceError::Timeout { duration_ms } => DispatchError::Timeout {
                operation: "latch wait".to_string(),
                duration_ms,
            },
            other => DispatchError::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for DispatchError {
    fn from(err: serde_yaml::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_error_display() {
        let err = DispatchError::fold("increment", "overflow");
        assert_eq!(err.to_string(), "Action 'increment' fold failed: overflow");
    }

    #[test]
    fn test_from_sequence_error() {
        assert!(matches!(
            DispatchError::from(SequenceError::Interrupted),
            DispatchError::Interrupted
        ));
        assert!(matches!(
            DispatchError::from(SequenceError::Abandoned),
            DispatchError::Abandoned
        ));
        assert!(matches!(
            DispatchError::from(SequenceError::AlreadyTaken),
            DispatchError::ProtocolViolation(_)
        ));
        assert!(matches!(
            DispatchError::from(SequenceError::Timeout { duration_ms: 3 }),
            DispatchError::Timeout { duration_ms: 3, .. }
        ));
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(DispatchError::Interrupted.is_cancellation());
        assert!(DispatchError::Abandoned.is_cancellation());
        assert!(!DispatchError::task("boom").is_cancellation());
        assert!(!DispatchError::Custom("x".into()).is_cancellation());
    }

    #[test]
    fn test_serde_errors_convert() {
        let json_err = serde_json::from_str::<u8>("not json").unwrap_err();
        assert!(matches!(
            DispatchError::from(json_err),
            DispatchError::Serialization(_)
        ));
    }
}
