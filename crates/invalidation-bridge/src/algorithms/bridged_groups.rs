//! # Bridged Groups Recomputation
//!
//! Builds a fresh [`BridgedGroups`] snapshot from the full contents of the
//! announcement store. The snapshot is assembled off to the side and only
//! then handed back, so the caller can publish it in one step.

use crate::domain::{Announcement, BridgeError, BridgedGroups, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Result of one recomputation pass.
#[derive(Debug)]
pub struct Recomputation {
    /// The new snapshot.
    pub snapshot: BridgedGroups,
    /// Entries that could not be interpreted and were skipped.
    pub malformed: Vec<BridgeError>,
    /// Keys whose value was absent and were skipped.
    pub absent: Vec<String>,
}

/// Union the groups of every announcement not owned by `local`.
///
/// A missing or malformed entry is skipped; it never blocks the rest.
pub fn recompute_bridged_groups(
    local: &NodeId,
    entries: &BTreeMap<String, Option<Vec<u8>>>,
    generation: u64,
) -> Recomputation {
    let mut groups = BTreeSet::new();
    let mut malformed = Vec::new();
    let mut absent = Vec::new();

    for (key, value) in entries {
        if key == local.as_str() {
            continue;
        }

        let Some(bytes) = value else {
            absent.push(key.clone());
            continue;
        };

        match Announcement::decode(key, bytes) {
            Ok(announcement) => groups.extend(announcement.groups),
            Err(e) => malformed.push(e),
        }
    }

    Recomputation {
        snapshot: BridgedGroups::new(groups, generation),
        malformed,
        absent,
    }
}
