//! Counters for bridge activity
//!
//! One `BridgeMetrics` is shared by a controller and its relay.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe bridge counters.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Broadcasts handed to the RPC substrate
    pub broadcasts_sent: AtomicU64,
    /// Outbound events not sent because no peer bridges the group
    pub broadcasts_suppressed: AtomicU64,
    /// Broadcasts that failed or timed out
    pub broadcast_failures: AtomicU64,
    /// Inbound events applied to the local registry
    pub remote_events_applied: AtomicU64,
    /// Inbound events the local registry failed to apply
    pub remote_apply_failures: AtomicU64,
    /// Successful announcement writes/removals
    pub publishes: AtomicU64,
    /// Failed announcement writes/removals
    pub publish_failures: AtomicU64,
    /// Bridged-groups recomputations
    pub recomputations: AtomicU64,
    /// Store entries skipped as malformed
    pub malformed_announcements: AtomicU64,
    /// Dead nodes' announcements removed
    pub pruned_announcements: AtomicU64,
    /// Dead nodes' announcements that could not be removed
    pub prune_failures: AtomicU64,
}

impl BridgeMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            broadcasts_sent: load(&self.broadcasts_sent),
            broadcasts_suppressed: load(&self.broadcasts_suppressed),
            broadcast_failures: load(&self.broadcast_failures),
            remote_events_applied: load(&self.remote_events_applied),
            remote_apply_failures: load(&self.remote_apply_failures),
            publishes: load(&self.publishes),
            publish_failures: load(&self.publish_failures),
            recomputations: load(&self.recomputations),
            malformed_announcements: load(&self.malformed_announcements),
            pruned_announcements: load(&self.pruned_announcements),
            prune_failures: load(&self.prune_failures),
        }
    }
}

/// Serializable copy of [`BridgeMetrics`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`BridgeMetrics::broadcasts_sent`]
    pub broadcasts_sent: u64,
    /// See [`BridgeMetrics::broadcasts_suppressed`]
    pub broadcasts_suppressed: u64,
    /// See [`BridgeMetrics::broadcast_failures`]
    pub broadcast_failures: u64,
    /// See [`BridgeMetrics::remote_events_applied`]
    pub remote_events_applied: u64,
    /// See [`BridgeMetrics::remote_apply_failures`]
    pub remote_apply_failures: u64,
    /// See [`BridgeMetrics::publishes`]
    pub publishes: u64,
    /// See [`BridgeMetrics::publish_failures`]
    pub publish_failures: u64,
    /// See [`BridgeMetrics::recomputations`]
    pub recomputations: u64,
    /// See [`BridgeMetrics::malformed_announcements`]
    pub malformed_announcements: u64,
    /// See [`BridgeMetrics::pruned_announcements`]
    pub pruned_announcements: u64,
    /// See [`BridgeMetrics::prune_failures`]
    pub prune_failures: u64,
}
