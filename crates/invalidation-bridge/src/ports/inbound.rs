//! # Inbound Ports
//!
//! What the bridge offers: the outbound-invalidation API driven by local
//! code, and the three remote entry points driven by the RPC substrate.

use crate::domain::{BatchEntry, BridgedGroups, CacheKey, DeliveryMode, InvalidationEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// What happened to an outbound invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// No other node maintains the group(s); nothing was sent.
    Suppressed,
    /// One broadcast was handed to the RPC substrate.
    Sent,
    /// The broadcast failed or timed out; it was logged and dropped.
    Failed,
}

impl BroadcastOutcome {
    /// Whether a network call was attempted.
    pub fn attempted(&self) -> bool {
        !matches!(self, Self::Suppressed)
    }
}

/// Invalidation bridge API - inbound port for local code.
///
/// Failures to notify peers are never reported as errors.
#[async_trait]
pub trait InvalidationBridgeApi: Send + Sync {
    /// Propagate eviction of one key.
    async fn invalidate(&self, group: &str, key: CacheKey, mode: DeliveryMode)
        -> BroadcastOutcome;

    /// Propagate eviction of several keys of one group.
    async fn invalidate_many(
        &self,
        group: &str,
        keys: Vec<CacheKey>,
        mode: DeliveryMode,
    ) -> BroadcastOutcome;

    /// Propagate a batch across groups; only bridged entries are sent.
    async fn batch_invalidate(&self, entries: Vec<BatchEntry>, mode: DeliveryMode)
        -> BroadcastOutcome;

    /// Current bridged-groups snapshot.
    fn bridged_groups(&self) -> Arc<BridgedGroups>;
}

/// Remote invalidation entry points - inbound port for the RPC substrate.
#[async_trait]
pub trait RemoteInvalidationHandler: Send + Sync {
    /// A peer invalidated one key.
    async fn invalidate_one(&self, group: String, key: CacheKey);

    /// A peer invalidated several keys of one group.
    async fn invalidate_many(&self, group: String, keys: Vec<CacheKey>);

    /// A peer invalidated a batch across groups.
    async fn invalidate_batch(&self, entries: Vec<BatchEntry>);

    /// Route a decoded call to its entry point.
    async fn dispatch(&self, event: InvalidationEvent) {
        match event {
            InvalidationEvent::Single { group, key } => self.invalidate_one(group, key).await,
            InvalidationEvent::Many { group, keys } => self.invalidate_many(group, keys).await,
            InvalidationEvent::Batch { entries } => self.invalidate_batch(entries).await,
        }
    }
}
