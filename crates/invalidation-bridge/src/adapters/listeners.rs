//! Listener bookkeeping shared by the in-memory adapters.

use crate::ports::Subscription;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

struct Registered<T: ?Sized> {
    next_id: u64,
    listeners: BTreeMap<u64, Arc<T>>,
}

/// Ordered set of listeners; each entry is owned by the [`Subscription`]
/// returned from [`ListenerSet::add`].
pub(crate) struct ListenerSet<T: ?Sized> {
    inner: Arc<Mutex<Registered<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registered {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
        }
    }

    pub(crate) fn add(&self, label: impl Into<String>, listener: Arc<T>) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, listener);
            id
        };

        let weak: Weak<Mutex<Registered<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(label, move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.remove(&id);
            }
        })
    }

    /// Listeners in registration order. Callers notify outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.lock().listeners.values().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}
