//! Error routing
//!
//! A machine hands every failed fold and every failed task resolution to its
//! [`ErrorHandler`], together with the client the failure concerns. Closures
//! of shape `Fn(DispatchError, &C)` are handlers.
//!
//! Without a custom handler the machine picks a default:
//!
//! - if the client can record errors itself ([`ErrorLog`], opted into with
//!   [`MachineBuilder::log_to_client`](crate::MachineBuilder::log_to_client)),
//!   errors go to the client through [`ClientLogHandler`];
//! - otherwise [`DefaultHandler`] applies an [`ErrorPolicy`], which by default
//!   escalates: the error is logged and raised again as a panic on the
//!   synchronization context, so the failure cannot go unnoticed.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Receives errors raised while dispatching actions
pub trait ErrorHandler<C>: Send + Sync + 'static {
    /// Handle `error` on behalf of `client`
    fn handle(&self, error: DispatchError, client: &C);
}

impl<C, F> ErrorHandler<C> for F
where
    F: Fn(DispatchError, &C) + Send + Sync + 'static,
{
    fn handle(&self, error: DispatchError, client: &C) {
        self(error, client)
    }
}

/// Client able to record dispatch errors itself
pub trait ErrorLog {
    /// Record `error`
    fn log_error(&self, error: &DispatchError);
}

/// What [`DefaultHandler`] does with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Emit an error event and carry on
    Log,
    /// Emit an error event, then panic
    #[default]
    Escalate,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Log => write!(f, "log"),
            ErrorPolicy::Escalate => write!(f, "escalate"),
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "log" => Ok(ErrorPolicy::Log),
            "escalate" => Ok(ErrorPolicy::Escalate),
            other => Err(DispatchError::Configuration(format!(
                "Unknown error policy '{}', expected 'log' or 'escalate'",
                other
            ))),
        }
    }
}

/// Handler applying an [`ErrorPolicy`]
#[derive(Debug, Clone)]
pub struct DefaultHandler {
    machine: String,
    policy: ErrorPolicy,
}

impl DefaultHandler {
    /// Handler for the machine called `machine`
    pub fn new(machine: impl Into<String>, policy: ErrorPolicy) -> Self {
        Self {
            machine: machine.into(),
            policy,
        }
    }

    /// The configured policy
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }
}

impl Default for DefaultHandler {
    fn default() -> Self {
        Self::new("machine", ErrorPolicy::default())
    }
}

impl<C> ErrorHandler<C> for DefaultHandler {
    fn handle(&self, error: DispatchError, _client: &C) {
        tracing::error!(
            machine = %self.machine,
            error = %error,
            cancelled = error.is_cancellation(),
            "Unhandled dispatch error"
        );
        if self.policy == ErrorPolicy::Escalate {
            panic!("machine '{}': {}", self.machine, error);
        }
    }
}

/// Handler passing errors to an [`ErrorLog`] client
#[derive(Debug, Clone)]
pub struct ClientLogHandler {
    machine: String,
}

impl ClientLogHandler {
    /// Handler for the machine called `machine`
    pub fn new(machine: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
        }
    }
}

impl<C: ErrorLog> ErrorHandler<C> for ClientLogHandler {
    fn handle(&self, error: DispatchError, client: &C) {
        tracing::debug!(
            machine = %self.machine,
            error = %error,
            "Dispatch error handed to client"
        );
        client.log_error(&error);
    }
}
