//! # Outbound Ports
//!
//! Traits for the external collaborators the bridge depends on: membership,
//! the replicated announcement store, the RPC broadcast substrate and the
//! local invalidation registry.
//!
//! Each subscription hands back an explicit [`Subscription`] owned by the
//! caller; releasing it is the only way a listener gets deregistered.

use crate::algorithms::elect_primary;
use crate::domain::{DeliveryMode, InvalidationEvent, MembershipView, NodeId, PortError};
use crate::ports::inbound::RemoteInvalidationHandler;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Handle to a registered listener.
///
/// Calling [`Subscription::unsubscribe`] or dropping the handle deregisters
/// the listener exactly once.
pub struct Subscription {
    label: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription whose teardown runs `cancel`.
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// What this subscription listens to.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Deregister the listener.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Receives membership changes for a channel.
#[async_trait]
pub trait MembershipListener: Send + Sync {
    /// The set of alive members changed.
    async fn on_membership_changed(&self, view: MembershipView);
}

/// Receives announcement store mutations (local or remote) for a channel.
#[async_trait]
pub trait AnnouncementListener: Send + Sync {
    /// Some entry of the store changed.
    async fn on_announcements_changed(&self);
}

/// Receives local invalidation registry events.
#[async_trait]
pub trait LocalRegistryListener: Send + Sync {
    /// A group now exists locally.
    async fn on_group_created(&self, group: &str);

    /// A group no longer exists locally.
    async fn on_group_dropped(&self, group: &str);

    /// Local code requested an invalidation.
    async fn on_local_invalidate(&self, event: InvalidationEvent, mode: DeliveryMode);
}

/// Membership service - outbound port.
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Identity of this node.
    fn local_node(&self) -> NodeId;

    /// Currently alive members of `channel`.
    async fn current_members(&self, channel: &str) -> Result<BTreeSet<NodeId>, PortError>;

    /// Whether this node is primary for `channel`.
    ///
    /// Defaults to "lowest `NodeId` among the current members".
    async fn is_primary(&self, channel: &str) -> Result<bool, PortError> {
        let members = self.current_members(channel).await?;
        Ok(elect_primary(&members).as_ref() == Some(&self.local_node()))
    }

    /// Register for membership changes of `channel`.
    fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<Subscription, PortError>;
}

/// Replicated announcement store - outbound port.
///
/// A per-channel map from node identifier to an opaque value, replicated to
/// every node.
#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    /// Write or overwrite `key`.
    async fn set(&self, channel: &str, key: &str, value: Vec<u8>) -> Result<(), PortError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, channel: &str, key: &str) -> Result<(), PortError>;

    /// Every entry of `channel`. A value may be transiently absent.
    async fn get_all(&self, channel: &str)
        -> Result<BTreeMap<String, Option<Vec<u8>>>, PortError>;

    /// Register for mutations of `channel`.
    fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn AnnouncementListener>,
    ) -> Result<Subscription, PortError>;
}

/// RPC broadcast substrate - outbound port.
#[async_trait]
pub trait RpcBroadcast: Send + Sync {
    /// Register this node's handler for `channel`.
    ///
    /// Fails with [`PortError::NameCollision`] if one is already registered.
    fn register_handler(
        &self,
        channel: &str,
        handler: Arc<dyn RemoteInvalidationHandler>,
    ) -> Result<(), PortError>;

    /// Remove this node's handler for `channel`.
    fn unregister_handler(&self, channel: &str) -> Result<(), PortError>;

    /// Send `event` to every other member of the partition.
    ///
    /// In [`DeliveryMode::Sync`] this waits for delivery, bounded by the
    /// substrate's own timeout.
    async fn broadcast(
        &self,
        channel: &str,
        event: InvalidationEvent,
        mode: DeliveryMode,
    ) -> Result<(), PortError>;
}

/// Local invalidation registry - outbound port.
///
/// Authoritative source of the invalidation groups that exist on this node.
#[async_trait]
pub trait LocalInvalidationRegistry: Send + Sync {
    /// Names of the groups that currently exist locally.
    fn current_group_names(&self) -> BTreeSet<String>;

    /// Register for group lifecycle and local invalidation events.
    fn subscribe(&self, listener: Arc<dyn LocalRegistryListener>) -> Result<Subscription, PortError>;

    /// Evict the keys named by `event` if present. Must not notify listeners.
    async fn apply_invalidation(&self, event: &InvalidationEvent) -> Result<(), PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_cancels_once_on_unsubscribe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new("store", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_cancels_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let counter = calls.clone();
            let _sub = Subscription::new("membership", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct FixedMembership {
        local: NodeId,
        members: BTreeSet<NodeId>,
    }

    #[async_trait]
    impl MembershipService for FixedMembership {
        fn local_node(&self) -> NodeId {
            self.local.clone()
        }

        async fn current_members(&self, _channel: &str) -> Result<BTreeSet<NodeId>, PortError> {
            Ok(self.members.clone())
        }

        fn subscribe(
            &self,
            channel: &str,
            _listener: Arc<dyn MembershipListener>,
        ) -> Result<Subscription, PortError> {
            Ok(Subscription::new(channel, || {}))
        }
    }

    #[tokio::test]
    async fn test_default_is_primary_uses_lowest_member() {
        let members: BTreeSet<NodeId> = ["b", "a", "c"].into_iter().map(NodeId::from).collect();
        let a = FixedMembership {
            local: NodeId::new("a"),
            members: members.clone(),
        };
        let b = FixedMembership {
            local: NodeId::new("b"),
            members,
        };

        assert!(a.is_primary("ch").await.unwrap());
        assert!(!b.is_primary("ch").await.unwrap());
    }
}
