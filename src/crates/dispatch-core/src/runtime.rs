//! Context setup for machines
//!
//! A [`DispatchRuntime`] owns the two contexts every machine needs: a serial
//! synchronization context (one dedicated thread, named after the
//! configuration) and a tokio multi-thread runtime whose blocking pool resolves
//! follow-ups. Machines created through it share both.
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::{action, DispatchConfig, DispatchRuntime, State};
//! use std::sync::Arc;
//!
//! let runtime = DispatchRuntime::from_config(DispatchConfig {
//!     worker_threads: 2,
//!     ..DispatchConfig::default()
//! })?;
//! let client = Arc::new(());
//! let machine = runtime.machine(State::new(0u32)).bind(runtime.worker(), &client);
//!
//! machine.start();
//! machine.apply(action(|s: State<u32, ()>, _: &()| Ok(s.map(|n| n + 1))));
//! runtime.settle(&machine.machine().backlog());
//! assert_eq!(machine.peek(), 1);
//! # Ok::<(), dispatch_core::DispatchError>(())
//! ```

use crate::backlog::Backlog;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::machine::{Machine, MachineBuilder, Worker};
use crate::state::State;
use dispatch_sequence::{SerialExecutor, TokioContext};
use std::sync::Arc;
use std::time::Duration;

/// Synchronization and worker contexts shared by machines
pub struct DispatchRuntime {
    config: DispatchConfig,
    sync: Arc<SerialExecutor>,
    worker: Worker,
    tokio: tokio::runtime::Runtime,
}

impl DispatchRuntime {
    /// Build the contexts described by `config`
    #[tracing::instrument(skip(config), fields(name = %config.name, worker_threads = config.worker_threads))]
    pub fn from_config(config: DispatchConfig) -> Result<Self> {
        config.validate()?;

        let tokio = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| {
                DispatchError::Configuration(format!("Failed to build worker runtime: {}", e))
            })?;
        let worker: Worker = Arc::new(TokioContext::new(tokio.handle().clone()));
        let sync = SerialExecutor::spawn(config.name.clone());

        tracing::info!("Dispatch runtime ready");
        Ok(Self {
            config,
            sync,
            worker,
            tokio,
        })
    }

    /// Runtime built from default settings
    pub fn new() -> Result<Self> {
        Self::from_config(DispatchConfig::default())
    }

    /// Active configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The synchronization context
    pub fn sync(&self) -> &Arc<SerialExecutor> {
        &self.sync
    }

    /// The worker context
    pub fn worker(&self) -> Worker {
        self.worker.clone()
    }

    /// Handle of the worker runtime, for async code living next to machines
    pub fn handle(&self) -> &tokio::runtime::Handle {
        self.tokio.handle()
    }

    /// Stopped machine on these contexts, configured from [`config`](Self::config)
    pub fn machine<S, C>(&self, initial: State<S, C>) -> Machine<S, C>
    where
        S: Clone + Send + 'static,
        C: Send + Sync + 'static,
    {
        self.builder(initial).build()
    }

    /// Machine builder preset from [`config`](Self::config), for further tuning
    pub fn builder<S, C>(&self, initial: State<S, C>) -> MachineBuilder<S, C>
    where
        S: Clone + Send + 'static,
        C: Send + Sync + 'static,
    {
        let builder = Machine::builder(self.sync.clone(), initial)
            .name(self.config.name.clone())
            .error_policy(self.config.error_policy);
        match self.config.drain_timeout() {
            Some(timeout) => builder.drain_timeout(timeout),
            None => builder,
        }
    }

    /// Block until queued folds ran and `backlog` is idle
    ///
    /// Folds posted before the call are flushed first, then the backlog wait
    /// covers every follow-up chain they started.
    ///
    /// # Panics
    ///
    /// Re-raises an escalated error that stopped the synchronization context.
    pub fn settle(&self, backlog: &Backlog) {
        self.sync.flush();
        if let Err(error) = backlog.wait_idle() {
            tracing::debug!(error = %error, "Settle interrupted");
        }
        self.sync.flush();
    }

    /// Stop both contexts, giving running follow-ups up to `timeout`
    pub fn shutdown(self, timeout: Duration) {
        tracing::info!(name = %self.config.name, "Shutting down dispatch runtime");
        self.sync.shutdown();
        self.tokio.shutdown_timeout(timeout);
    }
}

impl std::fmt::Debug for DispatchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRuntime")
            .field("config", &self.config)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}
