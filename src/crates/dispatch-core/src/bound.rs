//! Machine facade bound to one worker and one client
//!
//! Call sites rarely want to pass the worker and client on every call.
//! [`BoundMachine`] fixes both, keeping the client behind a
//! [`Binding`] so the facade never extends its lifetime. Once the client is
//! dropped every call becomes a no-op.

use crate::action::Action;
use crate::machine::{Machine, Worker};
use crate::state::State;
use dispatch_sequence::Binding;
use std::fmt;
use std::sync::Arc;

/// [`Machine`] partially applied to a worker and a weakly held client
pub struct BoundMachine<S, C> {
    machine: Machine<S, C>,
    worker: Worker,
    client: Binding<C>,
}

impl<S, C> Clone for BoundMachine<S, C> {
    fn clone(&self) -> Self {
        Self {
            machine: self.machine.clone(),
            worker: self.worker.clone(),
            client: self.client.clone(),
        }
    }
}

impl<S, C> BoundMachine<S, C>
where
    S: Clone + Send + 'static,
    C: Send + Sync + 'static,
{
    pub(crate) fn new(machine: Machine<S, C>, worker: Worker, client: &Arc<C>) -> Self {
        Self {
            machine,
            worker,
            client: Binding::bind(client),
        }
    }

    /// See [`Machine::start`]
    pub fn start(&self) {
        match self.client.upgrade() {
            Some(client) => self.machine.start(&self.worker, &client),
            None => self.client_gone("start"),
        }
    }

    /// See [`Machine::start_with`]
    pub fn start_with(&self, action: impl Action<S, C>) {
        match self.client.upgrade() {
            Some(client) => self.machine.start_with(&self.worker, &client, action),
            None => self.client_gone("start_with"),
        }
    }

    /// See [`Machine::stop`]
    pub fn stop(&self) {
        self.machine.stop();
    }

    /// See [`Machine::apply`]
    pub fn apply(&self, action: impl Action<S, C>) {
        if !self.client.is_alive() {
            self.client_gone("apply");
            return;
        }
        self.machine
            .apply(&self.worker, self.client.weak().clone(), action);
    }

    /// See [`Machine::peek`]
    pub fn peek(&self) -> S {
        self.machine.peek()
    }

    /// See [`Machine::state`]
    pub fn state(&self) -> State<S, C> {
        self.machine.state()
    }

    /// Whether the bound client is still alive
    pub fn is_bound(&self) -> bool {
        self.client.is_alive()
    }

    /// The underlying machine
    pub fn machine(&self) -> &Machine<S, C> {
        &self.machine
    }

    fn client_gone(&self, operation: &str) {
        tracing::debug!(
            machine = %self.machine.name(),
            operation = operation,
            "Bound client dropped, ignoring call"
        );
    }
}

impl<S, C> fmt::Debug for BoundMachine<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMachine")
            .field("machine", &self.machine)
            .field("client", &self.client)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action;
    use dispatch_sequence::Inline;

    struct View {
        renders: parking_lot::Mutex<Vec<i64>>,
    }

    type Screen = State<i64, View>;

    fn render(n: i64) -> impl Action<i64, View> {
        action(move |s: Screen, view: &View| {
            let s = s.map(|v| v + n);
            view.renders.lock().push(*s.value());
            Ok(s)
        })
    }

    fn setup() -> (Machine<i64, View>, Arc<View>, BoundMachine<i64, View>) {
        let machine = Machine::new(Arc::new(Inline), Screen::new(0));
        let view = Arc::new(View {
            renders: parking_lot::Mutex::new(Vec::new()),
        });
        let bound = machine.bind(Arc::new(Inline), &view);
        (machine, view, bound)
    }

    #[test]
    fn test_bound_machine_does_not_own_client() {
        let (_machine, view, bound) = setup();
        assert_eq!(Arc::strong_count(&view), 1);
        assert!(bound.is_bound());
        drop(view);
        assert!(!bound.is_bound());
    }

    #[test]
    fn test_bound_apply_and_start() {
        let (_machine, view, bound) = setup();
        bound.apply(render(2));
        assert_eq!(bound.peek(), 0);

        bound.start();
        bound.apply(render(3));
        assert_eq!(bound.peek(), 5);
        assert_eq!(*view.renders.lock(), vec![2, 5]);

        bound.stop();
        assert!(!bound.machine().is_running());
    }

    #[test]
    fn test_calls_after_client_drop_are_noops() {
        let (machine, view, bound) = setup();
        bound.start();
        drop(view);

        bound.apply(render(1));
        bound.start_with(render(1));
        assert_eq!(bound.peek(), 0);
        assert_eq!(machine.state().pending(), 0);
    }
}
