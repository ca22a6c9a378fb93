//! Machine state and its queue of pending follow-ups
//!
//! A [`State`] pairs the application's value with a FIFO of task handles that
//! will each produce another [`Action`](crate::Action), plus the
//! [`Backlog`] shared by every state of the same lineage.
//!
//! Folds take a state by value and return the next one:
//!
//! ```rust
//! use dispatch_core::{action, State};
//!
//! #[derive(Clone)]
//! struct Table {
//!     chips: u32,
//! }
//!
//! let payout = action(|state: State<Table, ()>, _: &()| {
//!     Ok(state.map(|t| Table { chips: t.chips + 20 }))
//! });
//! let bet = action(move |state: State<Table, ()>, _client: &()| {
//!     Ok(state
//!         .map(|t| Table { chips: t.chips - 10 })
//!         .spawn(move || Ok(payout)))
//! });
//! # let _ = bet;
//! ```
//!
//! The queue is only appended to by folds. Handles leave it only when the
//! machine drains or reconciles them, so a fold never sees its own follow-ups
//! disappear underneath it.

use crate::action::{Action, BoxAction};
use crate::backlog::Backlog;
use crate::error::Result;
use crate::task::Task;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Value folded by actions, plus its pending asynchronous follow-ups
pub struct State<S, C> {
    value: S,
    pending: VecDeque<Task<BoxAction<S, C>>>,
    backlog: Arc<Backlog>,
}

impl<S, C> State<S, C>
where
    S: Send + 'static,
    C: 'static,
{
    /// Fresh lineage with its own backlog
    pub fn new(value: S) -> Self {
        Self::with_backlog(value, Arc::new(Backlog::new()))
    }

    /// State sharing an existing backlog
    pub fn with_backlog(value: S, backlog: Arc<Backlog>) -> Self {
        Self {
            value,
            pending: VecDeque::new(),
            backlog,
        }
    }

    /// Queue a task whose result is folded once it resolves
    pub fn enqueue(mut self, task: Task<BoxAction<S, C>>) -> Self {
        self.push(task);
        self
    }

    /// Queue a lazily evaluated follow-up
    ///
    /// `work` runs on the machine's worker context and returns the action to
    /// fold.
    pub fn spawn<A, F>(self, work: F) -> Self
    where
        A: Action<S, C>,
        F: FnOnce() -> Result<A> + Send + 'static,
    {
        self.enqueue(Task::lazy(move || {
            work().map(|action| Box::new(action) as BoxAction<S, C>)
        }))
    }

    /// Queue an action to fold right after this one, without real waiting
    pub fn plus(self, action: impl Action<S, C>) -> Self {
        self.enqueue(Task::ready(Box::new(action) as BoxAction<S, C>))
    }

    pub(crate) fn push(&mut self, task: Task<BoxAction<S, C>>) {
        self.pending.push_back(task);
    }

    /// Remove every queued handle, oldest first
    pub(crate) fn take_pending(&mut self) -> Vec<Task<BoxAction<S, C>>> {
        self.pending.drain(..).collect()
    }

    /// Remove the handles that are already resolved, oldest first
    ///
    /// Unresolved handles stay queued in their original order.
    pub fn take_resolved(&mut self) -> Vec<Task<BoxAction<S, C>>> {
        let mut resolved = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.pending.len());
        for task in self.pending.drain(..) {
            if task.is_resolved() {
                resolved.push(task);
            } else {
                waiting.push_back(task);
            }
        }
        self.pending = waiting;
        resolved
    }
}

impl<S, C> State<S, C> {
    /// Current value
    pub fn value(&self) -> &S {
        &self.value
    }

    /// Mutable access to the value
    pub fn value_mut(&mut self) -> &mut S {
        &mut self.value
    }

    /// Consume the state, keeping only the value
    pub fn into_value(self) -> S {
        self.value
    }

    /// Replace the value with `f(value)`
    pub fn map(mut self, f: impl FnOnce(S) -> S) -> Self {
        self.value = f(self.value);
        self
    }

    /// Replace the value outright
    pub fn set(mut self, value: S) -> Self {
        self.value = value;
        self
    }

    /// Number of queued task handles
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Backlog shared by this state's lineage
    pub fn backlog(&self) -> &Arc<Backlog> {
        &self.backlog
    }
}

impl<S: Clone, C> Clone for State<S, C> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            pending: self.pending.clone(),
            backlog: self.backlog.clone(),
        }
    }
}

impl<S: fmt::Debug, C> fmt::Debug for State<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("value", &self.value)
            .field("pending", &self.pending.len())
            .field("in_flight", &self.backlog.in_flight())
            .finish()
    }
}
