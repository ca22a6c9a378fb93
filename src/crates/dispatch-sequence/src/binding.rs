//! Weak-referenced bindings
//!
//! A [`Binding`] points at a value without keeping it alive. Once the owner
//! drops the value, everything dispatched through the binding quietly becomes a
//! no-op.

use std::sync::{Arc, Weak};

/// Non-owning handle to a shared value
pub struct Binding<T: ?Sized> {
    target: Weak<T>,
}

impl<T: ?Sized> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<T> Binding<T> {
    /// A binding that was never attached to anything
    pub fn detached() -> Self {
        Self { target: Weak::new() }
    }
}

impl<T> Default for Binding<T> {
    fn default() -> Self {
        Self::detached()
    }
}

impl<T: ?Sized> Binding<T> {
    /// Bind to `target` without taking ownership
    pub fn bind(target: &Arc<T>) -> Self {
        Self {
            target: Arc::downgrade(target),
        }
    }

    /// Wrap an existing weak reference
    pub fn from_weak(target: Weak<T>) -> Self {
        Self { target }
    }

    /// Strong handle, if the target is still alive
    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.target.upgrade()
    }

    /// Whether the target is still alive
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Run `f` against the target; `None` once the target is gone
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.upgrade().map(|target| f(&target))
    }

    /// The underlying weak reference
    pub fn weak(&self) -> &Weak<T> {
        &self.target
    }
}

impl<T: ?Sized> std::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_does_not_extend_lifetime() {
        let owner = Arc::new(String::from("view"));
        let binding = Binding::bind(&owner);

        assert!(binding.is_alive());
        assert_eq!(binding.with(|s| s.len()), Some(4));
        assert_eq!(Arc::strong_count(&owner), 1);

        drop(owner);
        assert!(!binding.is_alive());
        assert_eq!(binding.with(|s| s.len()), None);
        assert!(binding.upgrade().is_none());
    }

    #[test]
    fn test_detached_binding_is_dead() {
        let binding: Binding<u8> = Binding::detached();
        assert!(!binding.is_alive());
        assert_eq!(binding.with(|v| *v), None);
    }
}
