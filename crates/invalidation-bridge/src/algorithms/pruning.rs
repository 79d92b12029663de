//! # Stale Announcement Pruning
//!
//! A node that dies cannot remove its own announcement. Whichever surviving
//! node is primary removes it on the next membership change.

use crate::domain::{MembershipView, NodeId};
use std::collections::BTreeSet;

/// Deterministic primary: the lowest `NodeId` among the members.
pub fn elect_primary(members: &BTreeSet<NodeId>) -> Option<NodeId> {
    members.iter().next().cloned()
}

/// Announcement owners that are no longer alive in `view`.
///
/// `owners` are announcement store keys.
pub fn dead_announcement_owners<'a, I>(owners: I, view: &MembershipView) -> Vec<NodeId>
where
    I: IntoIterator<Item = &'a String>,
{
    owners
        .into_iter()
        .map(|key| NodeId::new(key.as_str()))
        .filter(|owner| !view.contains(owner))
        .collect()
}
