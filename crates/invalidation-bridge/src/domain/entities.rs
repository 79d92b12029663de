//! # Domain Entities
//!
//! Announcements, bridged-group snapshots, invalidation events and
//! membership views.

use super::errors::BridgeError;
use super::value_objects::{CacheKey, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A node's published list of locally available invalidation groups.
///
/// Stored in the announcement store under key = `owner`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Node that published the announcement.
    pub owner: NodeId,
    /// Invalidation groups that exist on `owner`.
    pub groups: BTreeSet<String>,
}

impl Announcement {
    /// Create an announcement.
    pub fn new(owner: NodeId, groups: BTreeSet<String>) -> Self {
        Self { owner, groups }
    }

    /// Encode for the announcement store.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a store entry, checking it against the key it was stored under.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, BridgeError> {
        let malformed = |reason: String| BridgeError::MalformedAnnouncement {
            key: key.to_string(),
            reason,
        };

        let owner = NodeId::parse(key).ok_or_else(|| malformed("invalid node id".to_string()))?;
        let announcement: Announcement =
            serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;

        if announcement.owner != owner {
            return Err(malformed(format!(
                "owner {} does not match store key",
                announcement.owner
            )));
        }

        Ok(announcement)
    }
}

/// Union of the groups announced by every *other* node.
///
/// Immutable; replaced wholesale on every recomputation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BridgedGroups {
    groups: BTreeSet<String>,
    generation: u64,
}

impl BridgedGroups {
    /// Create a snapshot.
    pub fn new(groups: BTreeSet<String>, generation: u64) -> Self {
        Self { groups, generation }
    }

    /// Whether some other node maintains `group`.
    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Bridged group names.
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Recomputation counter that produced this snapshot (0 = never computed).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of bridged groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True if nothing is bridged.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Keys of one group inside a batch invalidation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Invalidation group name.
    pub group: String,
    /// Keys to evict.
    pub keys: Vec<CacheKey>,
}

impl BatchEntry {
    /// Create a batch entry.
    pub fn new(group: impl Into<String>, keys: Vec<CacheKey>) -> Self {
        Self {
            group: group.into(),
            keys,
        }
    }
}

/// A "this cached entry is stale" signal.
///
/// Applying an event is an idempotent, commutative "evict if present".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// One key of one group.
    Single {
        /// Invalidation group name
        group: String,
        /// Key to evict
        key: CacheKey,
    },
    /// Several keys of one group.
    Many {
        /// Invalidation group name
        group: String,
        /// Keys to evict
        keys: Vec<CacheKey>,
    },
    /// Keys across several groups in one message.
    Batch {
        /// Per-group keys
        entries: Vec<BatchEntry>,
    },
}

impl InvalidationEvent {
    /// Single-key event.
    pub fn single(group: impl Into<String>, key: impl Into<CacheKey>) -> Self {
        Self::Single {
            group: group.into(),
            key: key.into(),
        }
    }

    /// Multi-key event.
    pub fn many(group: impl Into<String>, keys: Vec<CacheKey>) -> Self {
        Self::Many {
            group: group.into(),
            keys,
        }
    }

    /// Batch event.
    pub fn batch(entries: Vec<BatchEntry>) -> Self {
        Self::Batch { entries }
    }

    /// Name of the RPC entry point that carries this event.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Single { .. } => "invalidate_one",
            Self::Many { .. } => "invalidate_many",
            Self::Batch { .. } => "invalidate_batch",
        }
    }

    /// Groups touched by this event, in message order.
    pub fn groups(&self) -> Vec<String> {
        match self {
            Self::Single { group, .. } | Self::Many { group, .. } => vec![group.clone()],
            Self::Batch { entries } => entries.iter().map(|e| e.group.clone()).collect(),
        }
    }

    /// Total number of keys carried.
    pub fn key_count(&self) -> usize {
        match self {
            Self::Single { .. } => 1,
            Self::Many { keys, .. } => keys.len(),
            Self::Batch { entries } => entries.iter().map(|e| e.keys.len()).sum(),
        }
    }

    /// Flatten into `(group, key)` pairs.
    pub fn pairs(&self) -> Vec<(&str, &CacheKey)> {
        match self {
            Self::Single { group, key } => vec![(group.as_str(), key)],
            Self::Many { group, keys } => keys.iter().map(|k| (group.as_str(), k)).collect(),
            Self::Batch { entries } => entries
                .iter()
                .flat_map(|e| e.keys.iter().map(move |k| (e.group.as_str(), k)))
                .collect(),
        }
    }
}

/// Alive members of a channel and the member designated primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipView {
    members: BTreeSet<NodeId>,
    primary: Option<NodeId>,
}

impl MembershipView {
    /// Build a view; the lowest `NodeId` becomes primary.
    pub fn new(members: BTreeSet<NodeId>) -> Self {
        let primary = crate::algorithms::elect_primary(&members);
        Self { members, primary }
    }

    /// Alive members.
    pub fn members(&self) -> &BTreeSet<NodeId> {
        &self.members
    }

    /// Primary member, if the view is not empty.
    pub fn primary(&self) -> Option<&NodeId> {
        self.primary.as_ref()
    }

    /// Whether `node` is the primary of this view.
    pub fn is_primary(&self, node: &NodeId) -> bool {
        self.primary.as_ref() == Some(node)
    }

    /// Whether `node` is alive in this view.
    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }
}

impl FromIterator<NodeId> for MembershipView {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_announcement_decode_checks_owner() {
        let ann = Announcement::new(NodeId::new("node-x"), groups(&["orders"]));
        let bytes = ann.encode().unwrap();

        assert_eq!(Announcement::decode("node-x", &bytes).unwrap(), ann);
        assert!(matches!(
            Announcement::decode("node-y", &bytes),
            Err(BridgeError::MalformedAnnouncement { .. })
        ));
    }

    #[test]
    fn test_announcement_decode_rejects_garbage() {
        let result = Announcement::decode("node-x", b"{\"groups\": 7}");
        assert!(matches!(
            result,
            Err(BridgeError::MalformedAnnouncement { ref key, .. }) if key == "node-x"
        ));
    }

    #[test]
    fn test_event_groups_and_method_names() {
        let batch = InvalidationEvent::batch(vec![
            BatchEntry::new("orders", vec!["1".into()]),
            BatchEntry::new("users", vec!["2".into(), "3".into()]),
        ]);
        assert_eq!(batch.groups(), vec!["orders", "users"]);
        assert_eq!(batch.key_count(), 3);
        assert_eq!(batch.method_name(), "invalidate_batch");
        assert_eq!(InvalidationEvent::single("orders", "42").method_name(), "invalidate_one");
    }

    #[test]
    fn test_event_pairs_flatten_batch() {
        let batch = InvalidationEvent::batch(vec![
            BatchEntry::new("a", vec!["1".into()]),
            BatchEntry::new("b", vec!["2".into()]),
        ]);
        let pairs: Vec<_> = batch
            .pairs()
            .into_iter()
            .map(|(g, k)| format!("{g}/{k}"))
            .collect();
        assert_eq!(pairs, vec!["a/1", "b/2"]);
    }

    #[test]
    fn test_membership_view_primary_is_lowest() {
        let view: MembershipView = ["node-q", "node-p", "node-r"]
            .into_iter()
            .map(NodeId::from)
            .collect();

        assert_eq!(view.primary(), Some(&NodeId::new("node-p")));
        assert!(view.is_primary(&NodeId::new("node-p")));
        assert!(!view.is_primary(&NodeId::new("node-q")));
    }

    #[test]
    fn test_empty_view_has_no_primary() {
        let view = MembershipView::new(BTreeSet::new());
        assert!(view.primary().is_none());
    }
}
