//! Actions: folds over [`State`]
//!
//! An [`Action`] consumes the current state and the client and returns the next
//! state. It must not block on asynchronous work; instead it queues follow-ups
//! on the state it returns ([`State::spawn`], [`State::enqueue`],
//! [`State::plus`]) and the machine folds their results later.
//!
//! Any `FnOnce(State<S, C>, &C) -> Result<State<S, C>>` closure is an action.
//! Wrap closures in [`action`] to get their argument types inferred.
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::{action, Action, ActionExt, State};
//!
//! let deal = action(|state: State<Vec<u8>, ()>, _: &()| {
//!     Ok(state.map(|mut hand| {
//!         hand.push(10);
//!         hand
//!     }))
//! });
//! let hit = action(|state: State<Vec<u8>, ()>, _: &()| {
//!     Ok(state.map(|mut hand| {
//!         hand.push(7);
//!         hand
//!     }))
//! });
//!
//! let next = Box::new(deal.then(hit)).fold(State::new(Vec::new()), &()).unwrap();
//! assert_eq!(next.value(), &vec![10, 7]);
//! ```

use crate::error::Result;
use crate::state::State;

/// A fold from one [`State`] to the next
pub trait Action<S, C>: Send + 'static {
    /// Produce the next state
    fn fold(self: Box<Self>, state: State<S, C>, client: &C) -> Result<State<S, C>>;

    /// Name used in logs and fold errors
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Type-erased action, as stored in a state's queue
pub type BoxAction<S, C> = Box<dyn Action<S, C>>;

impl<S, C, F> Action<S, C> for F
where
    F: FnOnce(State<S, C>, &C) -> Result<State<S, C>> + Send + 'static,
{
    fn fold(self: Box<Self>, state: State<S, C>, client: &C) -> Result<State<S, C>> {
        (*self)(state, client)
    }
}

/// Identity helper that fixes a closure's signature as an action
pub fn action<S, C, F>(f: F) -> F
where
    F: FnOnce(State<S, C>, &C) -> Result<State<S, C>> + Send + 'static,
{
    f
}

/// Action with an explicit name for logs and errors
pub struct Named<A> {
    name: String,
    inner: A,
}

impl<A> Named<A> {
    /// Attach `name` to `inner`
    pub fn new(name: impl Into<String>, inner: A) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl<S, C, A: Action<S, C>> Action<S, C> for Named<A> {
    fn fold(self: Box<Self>, state: State<S, C>, client: &C) -> Result<State<S, C>> {
        Box::new(self.inner).fold(state, client)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Two actions folded back to back in one step
///
/// If the first fold fails the second never runs.
pub struct Then<A, B> {
    first: A,
    second: B,
}

impl<S, C, A, B> Action<S, C> for Then<A, B>
where
    A: Action<S, C>,
    B: Action<S, C>,
{
    fn fold(self: Box<Self>, state: State<S, C>, client: &C) -> Result<State<S, C>> {
        let Then { first, second } = *self;
        let state = Box::new(first).fold(state, client)?;
        Box::new(second).fold(state, client)
    }

    fn name(&self) -> &str {
        self.first.name()
    }
}

/// Combinators available on every action
pub trait ActionExt<S, C>: Action<S, C> + Sized {
    /// Fold `self`, then `next`, as a single step
    fn then<B: Action<S, C>>(self, next: B) -> Then<Self, B> {
        Then {
            first: self,
            second: next,
        }
    }

    /// Give the action a readable name
    fn named(self, name: impl Into<String>) -> Named<Self> {
        Named::new(name, self)
    }
}

impl<S, C, A: Action<S, C>> ActionExt<S, C> for A {}
