//! The dispatch machine
//!
//! A [`Machine`] folds actions over a [`State`] on one designated
//! synchronization context and resolves the follow-ups those folds queue on a
//! worker context. Two engine states exist, **stopped** (initial) and
//! **running**:
//!
//! - [`apply`](Machine::apply) posts the fold to the synchronization context.
//!   While stopped the action is queued as an already-resolved task instead of
//!   being folded, so nothing applied to a paused machine is lost.
//! - [`start`](Machine::start) switches to running and folds every queued task
//!   that already resolved, in queue order, on the calling thread.
//! - [`start_with`](Machine::start_with) additionally waits, on the worker, for
//!   the [`Backlog`] to go idle before applying a fresh action, so stale
//!   continuations never interleave with it.
//! - [`stop`](Machine::stop) switches to stopped without cancelling anything;
//!   in-flight follow-ups finish and are reconciled by the next `start`.
//!
//! # Drain
//!
//! After each successful fold the machine takes every handle the new state
//! queued. Each one is counted on the backlog and resolved on the worker; its
//! action is then posted back to the synchronization context and folded, which
//! drains that fold's follow-ups in turn. The backlog count is released only
//! after the resulting fold (or deferral, or error report) completed, so an
//! idle backlog means every chain has been folded.
//!
//! # Failures
//!
//! Folds run on a copy of the state. A failing or panicking fold leaves the
//! previous state in place and the error goes to the machine's
//! [`ErrorHandler`] together with the client. Failed task resolutions are
//! reported the same way, on the synchronization context.
//!
//! # Re-entry
//!
//! A fold may call back into its own machine (`apply`, `start`), directly or
//! through the client. On the folding thread such calls are queued and run
//! once the current fold has committed, in the order they were made.
//!
//! # Clients
//!
//! Asynchronous chains carry the client as a [`Weak`]. A fold that comes due
//! after the client was dropped is skipped with a debug event.
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::{action, Machine, State};
//! use dispatch_sequence::{Executor, SerialExecutor, TokioContext};
//! use std::sync::Arc;
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let sync = SerialExecutor::spawn("main");
//! let worker: Arc<dyn Executor> = Arc::new(TokioContext::new(rt.handle().clone()));
//! let machine = Machine::new(sync.clone(), State::new(0i64));
//! let client = Arc::new(());
//!
//! machine.start(&worker, &client);
//! machine.apply(&worker, Arc::downgrade(&client), action(|s: State<i64, ()>, _: &()| {
//!     Ok(s.map(|n| n + 1)
//!         .spawn(|| Ok(action(|s: State<i64, ()>, _: &()| Ok(s.map(|n| n + 10))))))
//! }));
//!
//! sync.flush();
//! machine.backlog().wait_idle().unwrap();
//! assert_eq!(machine.peek(), 11);
//! ```

use crate::action::{Action, BoxAction};
use crate::backlog::{Backlog, InFlight};
use crate::bound::BoundMachine;
use crate::error::DispatchError;
use crate::handler::{ClientLogHandler, DefaultHandler, ErrorHandler, ErrorLog, ErrorPolicy};
use crate::state::State;
use crate::task::Task;
use dispatch_sequence::{panic_message, Executor, Job};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Executor handle the machine resolves follow-ups on
pub type Worker = Arc<dyn Executor>;

struct Core<S, C> {
    running: bool,
    state: State<S, C>,
}

struct Shared<S, C> {
    name: String,
    sync: Arc<dyn Executor>,
    handler: Arc<dyn ErrorHandler<C>>,
    drain_timeout: Option<Duration>,
    core: Mutex<Core<S, C>>,
    // Held across a whole fold so folds from `start` and from the
    // synchronization context never overlap.
    folding: Mutex<()>,
    folder: Mutex<Option<ThreadId>>,
    // Calls made from inside a fold on the folding thread.
    reentrant: Mutex<VecDeque<Job>>,
}

/// Holds `folding` and records the holding thread
struct Folding<'a> {
    _lock: MutexGuard<'a, ()>,
    folder: &'a Mutex<Option<ThreadId>>,
}

impl Drop for Folding<'_> {
    fn drop(&mut self) {
        *self.folder.lock() = None;
    }
}

/// Reducer-style action dispatcher
pub struct Machine<S, C> {
    shared: Arc<Shared<S, C>>,
}

impl<S, C> Clone for Machine<S, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Builder for [`Machine`]
pub struct MachineBuilder<S, C> {
    name: String,
    sync: Arc<dyn Executor>,
    initial: State<S, C>,
    handler: Option<Arc<dyn ErrorHandler<C>>>,
    policy: ErrorPolicy,
    drain_timeout: Option<Duration>,
}

impl<S, C> MachineBuilder<S, C>
where
    S: Clone + Send + 'static,
    C: Send + Sync + 'static,
{
    /// Name carried on every log event
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Custom error handler; overrides [`error_policy`](Self::error_policy)
    pub fn handler(mut self, handler: impl ErrorHandler<C>) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Hand errors to the client, which records them itself
    ///
    /// Overrides [`error_policy`](Self::error_policy).
    pub fn log_to_client(mut self) -> Self
    where
        C: ErrorLog,
    {
        self.handler = Some(Arc::new(ClientLogHandler::new(self.name.clone())));
        self
    }

    /// Policy for the default handler, used when the client does not log
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound on the backlog wait in [`Machine::start_with`]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Create the machine, stopped
    pub fn build(self) -> Machine<S, C> {
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(DefaultHandler::new(self.name.clone(), self.policy)));
        Machine {
            shared: Arc::new(Shared {
                name: self.name,
                sync: self.sync,
                handler,
                drain_timeout: self.drain_timeout,
                core: Mutex::new(Core {
                    running: false,
                    state: self.initial,
                }),
                folding: Mutex::new(()),
                folder: Mutex::new(None),
                reentrant: Mutex::new(VecDeque::new()),
            }),
        }
    }
}

impl<S, C> Machine<S, C>
where
    S: Clone + Send + 'static,
    C: Send + Sync + 'static,
{
    /// Stopped machine folding on `sync`, with the default handler
    pub fn new(sync: Arc<dyn Executor>, initial: State<S, C>) -> Self {
        Self::builder(sync, initial).build()
    }

    /// Configure a machine before creating it
    pub fn builder(sync: Arc<dyn Executor>, initial: State<S, C>) -> MachineBuilder<S, C> {
        MachineBuilder {
            name: "machine".to_string(),
            sync,
            initial,
            handler: None,
            policy: ErrorPolicy::default(),
            drain_timeout: None,
        }
    }

    /// Name carried on log events
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the machine folds actions right away
    pub fn is_running(&self) -> bool {
        self.shared.core.lock().running
    }

    /// Backlog of the current state lineage
    pub fn backlog(&self) -> Arc<Backlog> {
        self.shared.core.lock().state.backlog().clone()
    }

    /// Copy of the current value
    pub fn peek(&self) -> S {
        self.shared.core.lock().state.value().clone()
    }

    /// Copy of the whole current state, queue included
    pub fn state(&self) -> State<S, C> {
        self.shared.core.lock().state.clone()
    }

    /// Switch to running and fold every already-resolved queued task
    ///
    /// The folds happen on the calling thread, in queue order. Their follow-ups,
    /// and any queued task that has not resolved yet, are then drained onto
    /// `worker`. Starting a running machine only reconciles again.
    pub fn start(&self, worker: &Worker, client: &Arc<C>) {
        let shared = &self.shared;
        if shared.folding_here() {
            tracing::debug!(machine = %shared.name, "Start requested inside a fold, queued");
            let machine = self.clone();
            let worker = worker.clone();
            let client = client.clone();
            shared
                .reentrant
                .lock()
                .push_back(Box::new(move || machine.start(&worker, &client)));
            return;
        }
        let mut errors = Vec::new();

        let tasks = {
            let _folding = shared.lock_folding();
            let (was_running, resolved) = {
                let mut core = shared.core.lock();
                let was_running = std::mem::replace(&mut core.running, true);
                (was_running, core.state.take_resolved())
            };
            tracing::info!(
                machine = %shared.name,
                was_running = was_running,
                reconciled = resolved.len(),
                "Machine started"
            );

            for task in resolved {
                let action = match task.resolve() {
                    Ok(action) => action,
                    Err(error) => {
                        errors.push(error);
                        continue;
                    }
                };
                match shared.fold(action, client) {
                    Ok(next) => shared.core.lock().state = next,
                    Err(error) => errors.push(error),
                }
            }
            shared.core.lock().state.take_pending()
        };

        shared.drain(worker, &Arc::downgrade(client), tasks);
        for error in errors {
            shared.handler.handle(error, client);
        }
        shared.run_reentrant();
    }

    /// [`start`](Self::start), then apply `action` once the backlog is idle
    ///
    /// The wait happens on `worker`, which therefore must be able to resolve
    /// other tasks while one of its threads blocks. An interrupted wait drops
    /// the action and reports [`DispatchError::Interrupted`] to the handler;
    /// with a drain timeout configured, a wait that elapses drops the action
    /// and reports [`DispatchError::Timeout`].
    pub fn start_with(&self, worker: &Worker, client: &Arc<C>, action: impl Action<S, C>) {
        self.start(worker, client);

        let shared = self.shared.clone();
        let backlog = self.backlog();
        let next_worker = worker.clone();
        let client = Arc::downgrade(client);
        let action: BoxAction<S, C> = Box::new(action);
        worker.execute(Box::new(move || {
            let waited = match shared.drain_timeout {
                Some(timeout) => match backlog.wait_idle_timeout(timeout) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(DispatchError::Timeout {
                        operation: format!("draining backlog before '{}'", action.name()),
                        duration_ms: timeout.as_millis() as u64,
                    }),
                    Err(error) => Err(error),
                },
                None => backlog.wait_idle(),
            };
            match waited {
                Ok(()) => shared.post(next_worker, client, action, None),
                Err(error) => {
                    tracing::warn!(
                        machine = %shared.name,
                        action = %action.name(),
                        in_flight = backlog.in_flight(),
                        error = %error,
                        "Backlog wait ended early, dropping action"
                    );
                    shared.report(error, client, None);
                }
            }
        }));
    }

    /// Fold `action` on the synchronization context
    ///
    /// While stopped the action is queued instead and folded by the next
    /// [`start`](Self::start).
    pub fn apply(&self, worker: &Worker, client: Weak<C>, action: impl Action<S, C>) {
        self.shared
            .post(worker.clone(), client, Box::new(action), None);
    }

    /// Switch to stopped; outstanding follow-ups keep running
    pub fn stop(&self) {
        let mut core = self.shared.core.lock();
        core.running = false;
        tracing::info!(
            machine = %self.shared.name,
            in_flight = core.state.backlog().in_flight(),
            "Machine stopped"
        );
    }

    /// Facade fixing `worker` and a weak reference to `client`
    pub fn bind(&self, worker: Worker, client: &Arc<C>) -> BoundMachine<S, C> {
        BoundMachine::new(self.clone(), worker, client)
    }
}

impl<S, C> Shared<S, C>
where
    S: Clone + Send + 'static,
    C: Send + Sync + 'static,
{
    fn lock_folding(&self) -> Folding<'_> {
        let lock = self.folding.lock();
        *self.folder.lock() = Some(thread::current().id());
        Folding {
            _lock: lock,
            folder: &self.folder,
        }
    }

    /// Whether the calling thread is inside one of this machine's folds
    fn folding_here(&self) -> bool {
        *self.folder.lock() == Some(thread::current().id())
    }

    /// Run the calls queued by folds, once no fold is in progress here
    fn run_reentrant(&self) {
        if self.folding_here() {
            return;
        }
        loop {
            let next = self.reentrant.lock().pop_front();
            match next {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Fold `action` over a copy of the current state
    ///
    /// Callers hold `folding`. Panics inside the fold become fold errors.
    fn fold(&self, action: BoxAction<S, C>, client: &C) -> Result<State<S, C>, DispatchError> {
        let name = action.name().to_string();
        let candidate = self.core.lock().state.clone();
        let outcome = match catch_unwind(AssertUnwindSafe(|| action.fold(candidate, client))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(DispatchError::fold(
                name.clone(),
                format!("fold panicked: {}", panic_message(payload.as_ref())),
            )),
        };
        match &outcome {
            Ok(next) => tracing::debug!(
                machine = %self.name,
                action = %name,
                queued = next.pending(),
                "Action folded"
            ),
            Err(error) => tracing::warn!(
                machine = %self.name,
                action = %name,
                error = %error,
                "Fold failed, keeping previous state"
            ),
        }
        outcome
    }

    /// Post a fold of `action` to the synchronization context
    ///
    /// `guard` is released once the fold, deferral or report is over.
    fn post(
        self: &Arc<Self>,
        worker: Worker,
        client: Weak<C>,
        action: BoxAction<S, C>,
        guard: Option<InFlight>,
    ) {
        let shared = self.clone();
        self.sync.execute(Box::new(move || {
            shared.fold_and_drain(&worker, &client, action, guard);
        }));
    }

    fn fold_and_drain(
        self: &Arc<Self>,
        worker: &Worker,
        client: &Weak<C>,
        action: BoxAction<S, C>,
        guard: Option<InFlight>,
    ) {
        if self.folding_here() {
            tracing::debug!(
                machine = %self.name,
                action = %action.name(),
                "Apply requested inside a fold, queued"
            );
            let shared = self.clone();
            let worker = worker.clone();
            let client = client.clone();
            self.reentrant.lock().push_back(Box::new(move || {
                shared.fold_and_drain(&worker, &client, action, guard);
            }));
            return;
        }

        let outcome = {
            let _folding = self.lock_folding();
            let running = self.core.lock().running;
            if !running {
                tracing::debug!(
                    machine = %self.name,
                    action = %action.name(),
                    "Machine stopped, deferring action"
                );
                self.core.lock().state.push(Task::ready(action));
                None
            } else if let Some(strong) = client.upgrade() {
                match self.fold(action, &strong) {
                    Ok(mut next) => {
                        let tasks = next.take_pending();
                        self.core.lock().state = next;
                        Some(Ok(tasks))
                    }
                    Err(error) => Some(Err((error, strong))),
                }
            } else {
                tracing::debug!(
                    machine = %self.name,
                    action = %action.name(),
                    "Client dropped, skipping action"
                );
                None
            }
        };

        match outcome {
            Some(Ok(tasks)) => self.drain(worker, client, tasks),
            Some(Err((error, strong))) => self.handler.handle(error, &strong),
            None => {}
        }
        drop(guard);
        self.run_reentrant();
    }

    /// Resolve each of `tasks` on `worker` and post the resulting actions back
    fn drain(self: &Arc<Self>, worker: &Worker, client: &Weak<C>, tasks: Vec<Task<BoxAction<S, C>>>) {
        if tasks.is_empty() {
            return;
        }
        let backlog = self.core.lock().state.backlog().clone();
        tracing::debug!(
            machine = %self.name,
            tasks = tasks.len(),
            in_flight = backlog.in_flight(),
            "Draining follow-up tasks"
        );

        for task in tasks {
            let guard = backlog.track();
            let shared = self.clone();
            let next_worker = worker.clone();
            let client = client.clone();
            worker.execute(Box::new(move || {
                let id = task.id();
                match task.resolve() {
                    Ok(action) => shared.post(next_worker, client, action, Some(guard)),
                    Err(error) => {
                        tracing::warn!(
                            machine = %shared.name,
                            task = %id,
                            error = %error,
                            "Task resolution failed"
                        );
                        shared.report(error, client, Some(guard));
                    }
                }
            }));
        }
    }

    /// Hand `error` to the handler on the synchronization context
    fn report(self: &Arc<Self>, error: DispatchError, client: Weak<C>, guard: Option<InFlight>) {
        let shared = self.clone();
        self.sync.execute(Box::new(move || {
            match client.upgrade() {
                Some(strong) => shared.handler.handle(error, &strong),
                None => tracing::debug!(
                    machine = %shared.name,
                    error = %error,
                    "Client dropped, discarding error"
                ),
            }
            drop(guard);
        }));
    }
}

impl<S, C> fmt::Debug for Machine<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("Machine")
            .field("name", &self.shared.name)
            .field("running", &core.running)
            .field("pending", &core.state.pending())
            .field("in_flight", &core.state.backlog().in_flight())
            .finish()
    }
}
