//! In-flight accounting for asynchronous follow-ups
//!
//! A [`Backlog`] counts the tasks a state lineage has handed to a worker and not
//! yet folded back. Callers block on [`Backlog::wait_idle`] until the count
//! returns to zero; the wait can be interrupted, and interruption is reported
//! as [`DispatchError::Interrupted`] rather than as a normal return.
//!
//! Every [`started`](Backlog::started) must be matched by exactly one
//! [`done`](Backlog::done). The [`InFlight`] guard pairs the two so the count
//! balances even when the work in between panics.
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::Backlog;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let backlog = Arc::new(Backlog::new());
//! let guard = backlog.track();
//! assert_eq!(backlog.in_flight(), 1);
//!
//! let handle = thread::spawn(move || drop(guard));
//! backlog.wait_idle().unwrap();
//! handle.join().unwrap();
//! assert_eq!(backlog.in_flight(), 0);
//! ```

use crate::error::{DispatchError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counter {
    in_flight: usize,
    // Bumped by `interrupt`; waiters that observe a change bail out.
    interrupts: u64,
}

/// Counting gate over outstanding asynchronous work
#[derive(Debug, Default)]
pub struct Backlog {
    counter: Mutex<Counter>,
    idle: Condvar,
}

impl Backlog {
    /// Create an idle backlog
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more task in flight
    pub fn started(&self) {
        let mut counter = self.counter.lock();
        counter.in_flight += 1;
        tracing::trace!(in_flight = counter.in_flight, "Backlog task started");
    }

    /// Record that one task finished
    ///
    /// # Panics
    ///
    /// Panics when nothing is in flight: a `done` without a matching `started`
    /// is a protocol violation.
    pub fn done(&self) {
        let mut counter = self.counter.lock();
        if counter.in_flight == 0 {
            drop(counter);
            panic!(
                "{}",
                DispatchError::ProtocolViolation(
                    "Backlog::done called with nothing in flight".to_string()
                )
            );
        }
        counter.in_flight -= 1;
        tracing::trace!(in_flight = counter.in_flight, "Backlog task done");
        if counter.in_flight == 0 {
            drop(counter);
            self.idle.notify_all();
        }
    }

    /// Call [`started`](Self::started) and return a guard that calls
    /// [`done`](Self::done) when dropped
    pub fn track(self: &Arc<Self>) -> InFlight {
        self.started();
        InFlight {
            backlog: self.clone(),
        }
    }

    /// Number of tasks currently in flight
    pub fn in_flight(&self) -> usize {
        self.counter.lock().in_flight
    }

    /// Whether nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Block until nothing is in flight
    ///
    /// Returns [`DispatchError::Interrupted`] when [`interrupt`](Self::interrupt)
    /// is called while waiting.
    pub fn wait_idle(&self) -> Result<()> {
        let mut counter = self.counter.lock();
        let epoch = counter.interrupts;
        while counter.in_flight > 0 {
            if counter.interrupts != epoch {
                return Err(DispatchError::Interrupted);
            }
            self.idle.wait(&mut counter);
        }
        Ok(())
    }

    /// Bounded [`wait_idle`](Self::wait_idle)
    ///
    /// `Ok(true)` when the backlog drained, `Ok(false)` when `timeout` elapsed
    /// first.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut counter = self.counter.lock();
        let epoch = counter.interrupts;
        while counter.in_flight > 0 {
            if counter.interrupts != epoch {
                return Err(DispatchError::Interrupted);
            }
            if self.idle.wait_until(&mut counter, deadline).timed_out() {
                return Ok(counter.in_flight == 0);
            }
        }
        Ok(true)
    }

    /// Wake every current waiter with [`DispatchError::Interrupted`]
    ///
    /// Waits that begin afterwards are unaffected.
    pub fn interrupt(&self) {
        let mut counter = self.counter.lock();
        counter.interrupts += 1;
        tracing::debug!(in_flight = counter.in_flight, "Backlog waiters interrupted");
        drop(counter);
        self.idle.notify_all();
    }
}

/// Guard for one in-flight task; calls [`Backlog::done`] on drop
#[must_use = "dropping the guard immediately marks the task done"]
#[derive(Debug)]
pub struct InFlight {
    backlog: Arc<Backlog>,
}

impl InFlight {
    /// The backlog this guard belongs to
    pub fn backlog(&self) -> &Arc<Backlog> {
        &self.backlog
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.backlog.done();
    }
}
