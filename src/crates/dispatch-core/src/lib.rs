//! # dispatch-core - Reducer-style action dispatch with tracked follow-ups
//!
//! A [`Machine`] folds [`Action`]s over a [`State`] on a single
//! synchronization context. A fold may queue asynchronous follow-ups on the
//! state it returns; the machine resolves them on a worker context and folds
//! their resulting actions back, one chain after another, until nothing is
//! left. A [`Backlog`] counts the work in flight so a pause/resume cycle never
//! loses or double-applies an action.
//!
//! ## Core Concepts
//!
//! ### Actions and states
//!
//! - [`State`] - the application's value, a FIFO of pending [`Task`] handles,
//!   and the lineage's [`Backlog`]
//! - [`Action`] - `fold(state, client) -> Result<State>`; closures qualify
//! - [`Task`] / [`Promise`] - one-shot handles producing the next action
//!
//! ### The machine
//!
//! - [`Machine::apply`] - fold now, or defer while stopped
//! - [`Machine::start`] / [`Machine::start_with`] - resume and reconcile
//! - [`Machine::stop`] - pause without cancelling outstanding work
//! - [`BoundMachine`] - the same, bound to one worker and a weakly held client
//!
//! ### Errors
//!
//! Failed folds and task resolutions become [`DispatchError`]s routed to the
//! machine's [`ErrorHandler`]. Protocol violations (unbalanced backlog, unknown
//! jump labels) panic.
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_core::{action, DispatchConfig, DispatchRuntime, State};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Default)]
//! struct Score {
//!     points: u32,
//! }
//!
//! struct Scoreboard;
//!
//! let runtime = DispatchRuntime::from_config(DispatchConfig::default())?;
//! let board = Arc::new(Scoreboard);
//! let machine = runtime
//!     .machine(State::new(Score::default()))
//!     .bind(runtime.worker(), &board);
//!
//! machine.start();
//! machine.apply(action(|state: State<Score, Scoreboard>, _board: &Scoreboard| {
//!     Ok(state
//!         .map(|s| Score { points: s.points + 1 })
//!         .spawn(|| {
//!             Ok(action(|state: State<Score, Scoreboard>, _: &Scoreboard| {
//!                 Ok(state.map(|s| Score { points: s.points * 10 }))
//!             }))
//!         }))
//! }));
//!
//! runtime.settle(&machine.machine().backlog());
//! assert_eq!(machine.peek().points, 10);
//! # Ok::<(), dispatch_core::DispatchError>(())
//! ```

pub mod action;
pub mod backlog;
pub mod bound;
pub mod config;
pub mod error;
pub mod handler;
pub mod machine;
pub mod runtime;
pub mod state;
pub mod task;

pub use action::{action, Action, ActionExt, BoxAction, Named, Then};
pub use backlog::{Backlog, InFlight};
pub use bound::BoundMachine;
pub use config::{load_config_file, DispatchConfig};
pub use error::{DispatchError, Result};
pub use handler::{ClientLogHandler, DefaultHandler, ErrorHandler, ErrorLog, ErrorPolicy};
pub use machine::{Machine, MachineBuilder, Worker};
pub use runtime::DispatchRuntime;
pub use state::State;
pub use task::{Promise, Task, TaskId};
