//! Single-set-once latch
//!
//! A [`Latch`] publishes exactly one value. Readers block until the value is
//! published, the producer abandons the latch, or the wait is interrupted; the
//! three outcomes stay distinguishable. A bounded wait can opt into a `None`
//! fallback instead of an error via [`Latch::wait_timeout`].
//!
//! # Example
//!
//! ```rust
//! use dispatch_sequence::Latch;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let latch = Arc::new(Latch::new());
//! let producer = latch.clone();
//! thread::spawn(move || producer.set(42).unwrap());
//!
//! assert_eq!(latch.wait(), Ok(42));
//! assert!(latch.set(7).is_err());
//! ```

use crate::error::{Result, SequenceError};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

enum Slot<T> {
    Empty,
    Set(T),
    Taken,
    Abandoned,
}

struct Inner<T> {
    slot: Slot<T>,
    // Bumped by `interrupt`; a waiter that sees it change gives up.
    interrupts: u64,
}

/// Value published at most once, awaited by any number of readers
pub struct Latch<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Latch<T> {
    /// Create an empty latch
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Empty,
                interrupts: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Create a latch that already holds `value`
    pub fn with_value(value: T) -> Self {
        let latch = Self::new();
        latch.inner.lock().slot = Slot::Set(value);
        latch
    }

    /// Publish the value and wake every reader
    ///
    /// A second call keeps the first value and returns
    /// [`SequenceError::AlreadySet`]; publishing into an abandoned latch returns
    /// [`SequenceError::Abandoned`].
    pub fn set(&self, value: T) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.slot {
            Slot::Empty => {
                inner.slot = Slot::Set(value);
                drop(inner);
                self.ready.notify_all();
                Ok(())
            }
            Slot::Set(_) | Slot::Taken => Err(SequenceError::AlreadySet),
            Slot::Abandoned => Err(SequenceError::Abandoned),
        }
    }

    /// Declare that no value will ever be published
    ///
    /// Returns `false` when a value was already published.
    pub fn abandon(&self) -> bool {
        let mut inner = self.inner.lock();
        if matches!(inner.slot, Slot::Empty) {
            inner.slot = Slot::Abandoned;
            drop(inner);
            self.ready.notify_all();
            true
        } else {
            matches!(inner.slot, Slot::Abandoned)
        }
    }

    /// Wake the readers currently blocked with [`SequenceError::Interrupted`]
    ///
    /// Readers that start waiting afterwards are unaffected.
    pub fn interrupt(&self) {
        self.inner.lock().interrupts += 1;
        self.ready.notify_all();
    }

    /// Whether a value has been published (even if since taken)
    pub fn is_set(&self) -> bool {
        matches!(self.inner.lock().slot, Slot::Set(_) | Slot::Taken)
    }

    /// Whether the latch was abandoned
    pub fn is_abandoned(&self) -> bool {
        matches!(self.inner.lock().slot, Slot::Abandoned)
    }

    /// Block until the value is published, then move it out
    ///
    /// Only one reader can take; later readers get [`SequenceError::AlreadyTaken`].
    pub fn take(&self) -> Result<T> {
        let mut inner = self.inner.lock();
        let epoch = inner.interrupts;
        loop {
            match std::mem::replace(&mut inner.slot, Slot::Taken) {
                Slot::Set(value) => return Ok(value),
                Slot::Taken => return Err(SequenceError::AlreadyTaken),
                Slot::Abandoned => {
                    inner.slot = Slot::Abandoned;
                    return Err(SequenceError::Abandoned);
                }
                Slot::Empty => {
                    inner.slot = Slot::Empty;
                    if inner.interrupts != epoch {
                        return Err(SequenceError::Interrupted);
                    }
                    self.ready.wait(&mut inner);
                }
            }
        }
    }
}

impl<T: Clone> Latch<T> {
    /// Block until the value is published and return a clone
    pub fn wait(&self) -> Result<T> {
        let mut inner = self.inner.lock();
        let epoch = inner.interrupts;
        loop {
            match &inner.slot {
                Slot::Set(value) => return Ok(value.clone()),
                Slot::Taken => return Err(SequenceError::AlreadyTaken),
                Slot::Abandoned => return Err(SequenceError::Abandoned),
                Slot::Empty => {
                    if inner.interrupts != epoch {
                        return Err(SequenceError::Interrupted);
                    }
                    self.ready.wait(&mut inner);
                }
            }
        }
    }

    /// Bounded [`wait`](Self::wait): `Ok(None)` when `timeout` elapses first
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let epoch = inner.interrupts;
        loop {
            match &inner.slot {
                Slot::Set(value) => return Ok(Some(value.clone())),
                Slot::Taken => return Err(SequenceError::AlreadyTaken),
                Slot::Abandoned => return Err(SequenceError::Abandoned),
                Slot::Empty => {
                    if inner.interrupts != epoch {
                        return Err(SequenceError::Interrupted);
                    }
                    if self.ready.wait_until(&mut inner, deadline).timed_out()
                        && matches!(inner.slot, Slot::Empty)
                        && inner.interrupts == epoch
                    {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Current value without blocking
    pub fn try_get(&self) -> Option<T> {
        match &self.inner.lock().slot {
            Slot::Set(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T> std::fmt::Debug for Latch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.lock().slot {
            Slot::Empty => "empty",
            Slot::Set(_) => "set",
            Slot::Taken => "taken",
            Slot::Abandoned => "abandoned",
        };
        f.debug_struct("Latch").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_once() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        latch.set(1).unwrap();
        assert!(latch.is_set());
        assert_eq!(latch.set(2), Err(SequenceError::AlreadySet));
        assert_eq!(latch.wait(), Ok(1));
    }

    #[test]
    fn test_wait_blocks_until_published() {
        let latch = Arc::new(Latch::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        latch.set("ready".to_string()).unwrap();

        for reader in readers {
            assert_eq!(reader.join().unwrap(), Ok("ready".to_string()));
        }
    }

    #[test]
    fn test_take_moves_value_once() {
        let latch = Latch::with_value(vec![1, 2, 3]);
        assert_eq!(latch.take(), Ok(vec![1, 2, 3]));
        assert_eq!(latch.take(), Err(SequenceError::AlreadyTaken));
        assert!(latch.is_set());
        assert_eq!(latch.try_get(), None);
    }

    #[test]
    fn test_abandon_wakes_readers() {
        let latch = Arc::new(Latch::<u8>::new());
        let reader = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(latch.abandon());

        assert_eq!(reader.join().unwrap(), Err(SequenceError::Abandoned));
        assert_eq!(latch.set(1), Err(SequenceError::Abandoned));
    }

    #[test]
    fn test_abandon_after_set_is_refused() {
        let latch = Latch::with_value(3);
        assert!(!latch.abandon());
        assert_eq!(latch.wait(), Ok(3));
    }

    #[test]
    fn test_interrupt_is_distinguishable_and_not_sticky() {
        let latch = Arc::new(Latch::<u8>::new());
        let reader = {
            let latch = latch.clone();
            thread::spawn(move || latch.take())
        };

        // Keep interrupting until the reader has actually parked and given up.
        while !reader.is_finished() {
            latch.interrupt();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(reader.join().unwrap(), Err(SequenceError::Interrupted));

        latch.set(9).unwrap();
        assert_eq!(latch.wait(), Ok(9));
    }

    #[test]
    fn test_wait_timeout_falls_back_to_none() {
        let latch = Latch::<u8>::new();
        assert_eq!(latch.wait_timeout(Duration::from_millis(10)), Ok(None));

        latch.set(5).unwrap();
        assert_eq!(latch.wait_timeout(Duration::from_millis(10)), Ok(Some(5)));
    }
}
