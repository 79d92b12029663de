//! In-memory invalidation registry holding real cached keys.
//!
//! Local invalidations evict and then notify listeners; remote ones arriving
//! through [`LocalInvalidationRegistry::apply_invalidation`] only evict.

use super::listeners::ListenerSet;
use crate::domain::{CacheKey, DeliveryMode, InvalidationEvent, PortError};
use crate::ports::{LocalInvalidationRegistry, LocalRegistryListener, Subscription};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Per-node cache groups and their keys.
pub struct InMemoryInvalidationRegistry {
    groups: RwLock<BTreeMap<String, BTreeSet<CacheKey>>>,
    listeners: ListenerSet<dyn LocalRegistryListener>,
    applied: Mutex<Vec<InvalidationEvent>>,
    rejecting: AtomicBool,
}

impl Default for InMemoryInvalidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInvalidationRegistry {
    /// Create a registry with no groups.
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(BTreeMap::new()),
            listeners: ListenerSet::new(),
            applied: Mutex::new(Vec::new()),
            rejecting: AtomicBool::new(false),
        }
    }

    /// Create `group` if missing and tell listeners.
    pub async fn create_group(&self, group: &str) {
        let created = {
            let mut groups = self.groups.write();
            if groups.contains_key(group) {
                false
            } else {
                groups.insert(group.to_string(), BTreeSet::new());
                true
            }
        };
        if created {
            for listener in self.listeners.snapshot() {
                listener.on_group_created(group).await;
            }
        }
    }

    /// Drop `group` and its keys and tell listeners.
    pub async fn drop_group(&self, group: &str) {
        let dropped = self.groups.write().remove(group).is_some();
        if dropped {
            for listener in self.listeners.snapshot() {
                listener.on_group_dropped(group).await;
            }
        }
    }

    /// Cache `key` in `group`. Returns false if the group does not exist.
    pub fn put(&self, group: &str, key: impl Into<CacheKey>) -> bool {
        match self.groups.write().get_mut(group) {
            Some(keys) => {
                keys.insert(key.into());
                true
            }
            None => false,
        }
    }

    /// Whether `key` is cached in `group`.
    pub fn contains(&self, group: &str, key: &str) -> bool {
        self.groups
            .read()
            .get(group)
            .is_some_and(|keys| keys.contains(&CacheKey::new(key)))
    }

    /// Keys cached in `group`.
    pub fn keys(&self, group: &str) -> BTreeSet<CacheKey> {
        self.groups.read().get(group).cloned().unwrap_or_default()
    }

    /// Evict locally, then hand the event to listeners (the bridge).
    pub async fn invalidate(&self, event: InvalidationEvent, mode: DeliveryMode) {
        self.evict(&event);
        for listener in self.listeners.snapshot() {
            listener.on_local_invalidate(event.clone(), mode).await;
        }
    }

    /// Single-key form of [`Self::invalidate`].
    pub async fn invalidate_key(&self, group: &str, key: &str, mode: DeliveryMode) {
        self.invalidate(InvalidationEvent::single(group, key), mode)
            .await;
    }

    /// Remote events applied so far.
    pub fn applied_events(&self) -> Vec<InvalidationEvent> {
        self.applied.lock().clone()
    }

    /// Make [`LocalInvalidationRegistry::apply_invalidation`] fail.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn evict(&self, event: &InvalidationEvent) -> usize {
        let mut groups = self.groups.write();
        let mut evicted = 0;
        for (group, key) in event.pairs() {
            if let Some(keys) = groups.get_mut(group) {
                if keys.remove(key) {
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

#[async_trait]
impl LocalInvalidationRegistry for InMemoryInvalidationRegistry {
    fn current_group_names(&self) -> BTreeSet<String> {
        self.groups.read().keys().cloned().collect()
    }

    fn subscribe(&self, listener: Arc<dyn LocalRegistryListener>) -> Result<Subscription, PortError> {
        Ok(self.listeners.add("registry", listener))
    }

    async fn apply_invalidation(&self, event: &InvalidationEvent) -> Result<(), PortError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(PortError::Rejected(event.method_name().to_string()));
        }
        let evicted = self.evict(event);
        trace!(method = event.method_name(), evicted, "[registry] applied remote invalidation");
        self.applied.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LocalRegistryListener for Recorder {
        async fn on_group_created(&self, group: &str) {
            self.calls.lock().push(format!("created:{group}"));
        }

        async fn on_group_dropped(&self, group: &str) {
            self.calls.lock().push(format!("dropped:{group}"));
        }

        async fn on_local_invalidate(&self, event: InvalidationEvent, _mode: DeliveryMode) {
            self.calls.lock().push(format!("invalidate:{}", event.key_count()));
        }
    }

    #[tokio::test]
    async fn test_group_lifecycle_notifies_once() {
        let registry = InMemoryInvalidationRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = registry.subscribe(recorder.clone()).unwrap();

        registry.create_group("orders").await;
        registry.create_group("orders").await;
        registry.drop_group("orders").await;
        registry.drop_group("orders").await;

        assert_eq!(
            *recorder.calls.lock(),
            vec!["created:orders".to_string(), "dropped:orders".to_string()]
        );
    }

    #[tokio::test]
    async fn test_local_invalidate_evicts_and_notifies() {
        let registry = InMemoryInvalidationRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = registry.subscribe(recorder.clone()).unwrap();
        registry.create_group("orders").await;
        assert!(registry.put("orders", "1"));
        assert!(!registry.put("missing", "1"));

        registry.invalidate_key("orders", "1", DeliveryMode::Sync).await;

        assert!(!registry.contains("orders", "1"));
        assert_eq!(recorder.calls.lock().last().unwrap(), "invalidate:1");
    }

    #[tokio::test]
    async fn test_remote_apply_does_not_notify() {
        let registry = InMemoryInvalidationRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let _sub = registry.subscribe(recorder.clone()).unwrap();
        registry.create_group("orders").await;
        registry.put("orders", "1");

        registry
            .apply_invalidation(&InvalidationEvent::single("orders", "1"))
            .await
            .unwrap();

        assert!(!registry.contains("orders", "1"));
        assert_eq!(*recorder.calls.lock(), vec!["created:orders".to_string()]);
    }

    #[tokio::test]
    async fn test_rejecting_registry() {
        let registry = InMemoryInvalidationRegistry::new();
        registry.set_rejecting(true);

        let result = registry
            .apply_invalidation(&InvalidationEvent::single("orders", "1"))
            .await;
        assert!(matches!(result, Err(PortError::Rejected(_))));
        assert!(registry.applied_events().is_empty());
    }
}
