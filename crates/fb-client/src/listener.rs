//! Weak listener registries.
//!
//! Registries never keep a listener alive: entries are [`Weak`] and are
//! purged once their target is dropped. Notification works on a snapshot,
//! so listeners may add or remove registrations from inside a callback.

use std::sync::{Arc, Weak};

use fb_wire::Diagnostic;
use parking_lot::Mutex;

/// Receives session lifecycle notifications.
///
/// All methods have empty defaults.
pub trait DatabaseListener: Send + Sync {
    /// The session is about to detach or drop the database.
    fn detaching(&self) {}

    /// The session has detached or lost its connection.
    fn detached(&self) {}

    /// A response carried a warning.
    fn warning_received(&self, _warning: &Diagnostic) {}
}

/// A set of weakly held listeners.
pub struct ListenerRegistry<L: ?Sized> {
    entries: Mutex<Vec<Weak<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Registering the same listener twice is a no-op.
    pub fn add(&self, listener: Weak<L>) {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|e| Weak::ptr_eq(e, &listener)) {
            entries.push(listener);
        }
    }

    /// Unregister a listener.
    pub fn remove(&self, listener: &Weak<L>) {
        self.entries.lock().retain(|e| !Weak::ptr_eq(e, listener));
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Live listeners, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.strong_count() > 0).count()
    }

    /// Whether no live listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
