//! In-memory replicated announcement store.
//!
//! Every [`StoreReplica`] reads and writes the same [`ReplicatedStore`], so a
//! write is visible cluster-wide as soon as it returns. Listeners on every
//! node are notified after each mutation, with no lock held.

use super::listeners::ListenerSet;
use crate::domain::{NodeId, PortError};
use crate::ports::{AnnouncementListener, AnnouncementStore, Subscription};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

type Entries = BTreeMap<String, Option<Vec<u8>>>;

/// A mutation issued through a replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    /// `set(key, ..)`
    Set(String),
    /// `remove(key)`
    Remove(String),
}

/// Shared contents of the store, one map per channel.
pub struct ReplicatedStore {
    channels: RwLock<BTreeMap<String, Entries>>,
    listeners: RwLock<BTreeMap<String, Arc<ListenerSet<dyn AnnouncementListener>>>>,
}

impl ReplicatedStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(BTreeMap::new()),
        })
    }

    /// Replica used by `node`.
    pub fn replica(self: &Arc<Self>, node: impl Into<NodeId>) -> Arc<StoreReplica> {
        Arc::new(StoreReplica {
            store: Arc::clone(self),
            node: node.into(),
            ops: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
            rejected_keys: Mutex::new(BTreeSet::new()),
        })
    }

    /// Write raw bytes without going through a replica.
    pub async fn put_raw(&self, channel: &str, key: &str, value: Option<Vec<u8>>) {
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.notify(channel).await;
    }

    /// Every entry of `channel`.
    pub fn entries(&self, channel: &str) -> Entries {
        self.channels.read().get(channel).cloned().unwrap_or_default()
    }

    /// Keys present in `channel`.
    pub fn keys(&self, channel: &str) -> BTreeSet<String> {
        self.entries(channel).into_keys().collect()
    }

    async fn notify(&self, channel: &str) {
        let set = self.listeners.read().get(channel).cloned();
        let Some(set) = set else {
            return;
        };
        for listener in set.snapshot() {
            listener.on_announcements_changed().await;
        }
    }

    fn listeners_for(&self, channel: &str) -> Arc<ListenerSet<dyn AnnouncementListener>> {
        self.listeners
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(ListenerSet::new()))
            .clone()
    }
}

/// One node's access to a [`ReplicatedStore`], recording what it issued.
pub struct StoreReplica {
    store: Arc<ReplicatedStore>,
    node: NodeId,
    ops: Mutex<Vec<StoreOp>>,
    unreachable: AtomicBool,
    rejected_keys: Mutex<BTreeSet<String>>,
}

impl StoreReplica {
    /// The shared store.
    pub fn store(&self) -> &Arc<ReplicatedStore> {
        &self.store
    }

    /// Every mutation issued through this replica, oldest first.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    /// Keys this replica tried to remove.
    pub fn remove_calls(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Remove(key) => Some(key.clone()),
                StoreOp::Set(_) => None,
            })
            .collect()
    }

    /// Fail every operation with [`PortError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail writes and removals of `key` with [`PortError::Rejected`].
    pub fn reject_key(&self, key: impl Into<String>) {
        self.rejected_keys.lock().insert(key.into());
    }

    fn check(&self, key: Option<&str>) -> Result<(), PortError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PortError::Unreachable(format!("store replica on {}", self.node)));
        }
        match key {
            Some(key) if self.rejected_keys.lock().contains(key) => {
                Err(PortError::Rejected(format!("write to {key}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl AnnouncementStore for StoreReplica {
    async fn set(&self, channel: &str, key: &str, value: Vec<u8>) -> Result<(), PortError> {
        self.ops.lock().push(StoreOp::Set(key.to_string()));
        self.check(Some(key))?;
        trace!(node = %self.node, channel, key, "[store] set");
        self.store.put_raw(channel, key, Some(value)).await;
        Ok(())
    }

    async fn remove(&self, channel: &str, key: &str) -> Result<(), PortError> {
        self.ops.lock().push(StoreOp::Remove(key.to_string()));
        self.check(Some(key))?;

        let removed = self
            .store
            .channels
            .write()
            .get_mut(channel)
            .and_then(|entries| entries.remove(key))
            .is_some();
        trace!(node = %self.node, channel, key, removed, "[store] remove");
        if removed {
            self.store.notify(channel).await;
        }
        Ok(())
    }

    async fn get_all(&self, channel: &str) -> Result<Entries, PortError> {
        self.check(None)?;
        Ok(self.store.entries(channel))
    }

    fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn AnnouncementListener>,
    ) -> Result<Subscription, PortError> {
        self.check(None)?;
        Ok(self
            .store
            .listeners_for(channel)
            .add(format!("store:{channel}:{}", self.node), listener))
    }
}
