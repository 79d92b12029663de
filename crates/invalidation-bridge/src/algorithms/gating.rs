//! # Outbound Gating
//!
//! An invalidation only leaves the node when some other node announced the
//! group it belongs to.

use crate::domain::{BatchEntry, BridgedGroups};

/// Whether an event for `group` should be broadcast.
pub fn is_bridged(bridged: &BridgedGroups, group: &str) -> bool {
    bridged.contains(group)
}

/// Keep only the batch entries whose group is bridged and that carry keys.
pub fn filter_batch(bridged: &BridgedGroups, entries: Vec<BatchEntry>) -> Vec<BatchEntry> {
    entries
        .into_iter()
        .filter(|entry| !entry.keys.is_empty() && is_bridged(bridged, &entry.group))
        .collect()
}
