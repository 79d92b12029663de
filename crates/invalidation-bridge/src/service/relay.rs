//! # Invalidation Relay
//!
//! Gates outbound invalidations by remote interest and applies inbound ones
//! to the local registry.
//!
//! Invalidation is an idempotent, commutative "evict if present" signal, so
//! no ordering is kept across nodes or groups. A stale bridged-groups
//! snapshot can at worst cause a redundant or a missed broadcast.

use crate::algorithms::{filter_batch, is_bridged};
use crate::domain::{
    BatchEntry, BridgeError, BridgedGroups, CacheKey, DeliveryMode, InvalidationEvent,
};
use crate::metrics::BridgeMetrics;
use crate::ports::{
    BroadcastOutcome, InvalidationBridgeApi, LocalInvalidationRegistry, RpcBroadcast,
};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Shared, lock-free handle to the current bridged-groups snapshot.
pub type BridgedGroupsHandle = Arc<ArcSwap<BridgedGroups>>;

/// Decides per event whether to broadcast, and applies remote events locally.
pub struct InvalidationRelay {
    channel: String,
    bridged: BridgedGroupsHandle,
    rpc: Arc<dyn RpcBroadcast>,
    registry: Arc<dyn LocalInvalidationRegistry>,
    metrics: Arc<BridgeMetrics>,
}

impl InvalidationRelay {
    /// Create a relay reading `bridged` and sending through `rpc`.
    pub fn new(
        channel: impl Into<String>,
        bridged: BridgedGroupsHandle,
        rpc: Arc<dyn RpcBroadcast>,
        registry: Arc<dyn LocalInvalidationRegistry>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            channel: channel.into(),
            bridged,
            rpc,
            registry,
            metrics,
        }
    }

    /// Forward a locally raised event if some other node bridges its group.
    ///
    /// Batches are narrowed to their bridged entries and sent as one call.
    /// Peer notification failures are logged, never returned.
    pub async fn on_local_invalidate(
        &self,
        event: InvalidationEvent,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        let bridged = self.bridged.load_full();

        let event = match event {
            InvalidationEvent::Batch { entries } => InvalidationEvent::Batch {
                entries: filter_batch(&bridged, entries),
            },
            other => other,
        };

        let wanted = match &event {
            InvalidationEvent::Single { group, .. } => is_bridged(&bridged, group),
            InvalidationEvent::Many { group, keys } => {
                !keys.is_empty() && is_bridged(&bridged, group)
            }
            InvalidationEvent::Batch { entries } => !entries.is_empty(),
        };

        if !wanted {
            trace!(
                channel = %self.channel,
                method = event.method_name(),
                "[bridge] No peer bridges this invalidation, not broadcasting"
            );
            BridgeMetrics::incr(&self.metrics.broadcasts_suppressed);
            return BroadcastOutcome::Suppressed;
        }

        self.send(event, mode).await
    }

    async fn send(&self, event: InvalidationEvent, mode: DeliveryMode) -> BroadcastOutcome {
        let groups = event.groups();
        let method = event.method_name();
        let keys = event.key_count();

        match self.rpc.broadcast(&self.channel, event, mode).await {
            Ok(()) => {
                debug!(
                    channel = %self.channel,
                    method,
                    ?groups,
                    keys,
                    ?mode,
                    "[bridge] Invalidation broadcast"
                );
                BridgeMetrics::incr(&self.metrics.broadcasts_sent);
                BroadcastOutcome::Sent
            }
            Err(source) => {
                // Expected under partial cluster failure.
                let err = BridgeError::Broadcast { groups, source };
                debug!(channel = %self.channel, method, error = %err, "[bridge] Broadcast dropped");
                BridgeMetrics::incr(&self.metrics.broadcast_failures);
                BroadcastOutcome::Failed
            }
        }
    }

    /// Apply an event received from a peer.
    ///
    /// Never consults the bridged groups and never re-broadcasts.
    pub async fn on_remote_invalidate(&self, event: InvalidationEvent) {
        match self.registry.apply_invalidation(&event).await {
            Ok(()) => {
                trace!(
                    channel = %self.channel,
                    method = event.method_name(),
                    keys = event.key_count(),
                    "[bridge] Applied remote invalidation"
                );
                BridgeMetrics::incr(&self.metrics.remote_events_applied);
            }
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    method = event.method_name(),
                    error = %e,
                    "[bridge] Local registry rejected remote invalidation"
                );
                BridgeMetrics::incr(&self.metrics.remote_apply_failures);
            }
        }
    }

    /// Current bridged-groups snapshot.
    pub fn bridged_groups(&self) -> Arc<BridgedGroups> {
        self.bridged.load_full()
    }
}

#[async_trait]
impl InvalidationBridgeApi for InvalidationRelay {
    async fn invalidate(
        &self,
        group: &str,
        key: CacheKey,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        self.on_local_invalidate(InvalidationEvent::single(group, key), mode)
            .await
    }

    async fn invalidate_many(
        &self,
        group: &str,
        keys: Vec<CacheKey>,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        self.on_local_invalidate(InvalidationEvent::many(group, keys), mode)
            .await
    }

    async fn batch_invalidate(
        &self,
        entries: Vec<BatchEntry>,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        self.on_local_invalidate(InvalidationEvent::batch(entries), mode)
            .await
    }

    fn bridged_groups(&self) -> Arc<BridgedGroups> {
        InvalidationRelay::bridged_groups(self)
    }
}
