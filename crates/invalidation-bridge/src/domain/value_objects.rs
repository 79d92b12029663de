//! # Domain Value Objects
//!
//! Immutable value types for the invalidation bridge.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a cluster member.
///
/// Stable for the lifetime of the node in the partition. The total order is
/// only meaningful for deterministic primary election.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a node identifier used as an announcement store key.
    ///
    /// Returns `None` for empty or whitespace-padded keys.
    pub fn parse(key: &str) -> Option<Self> {
        if key.is_empty() || key.trim() != key {
            return None;
        }
        Some(Self(key.to_string()))
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque cache key inside an invalidation group.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// How an outbound invalidation is handed to the RPC substrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Wait for every peer to process the call (bounded by the substrate timeout).
    Sync,
    /// Enqueue the call and return immediately.
    #[default]
    Async,
}

/// Bridge controller lifecycle.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BridgeState {
    /// Not registered anywhere.
    #[default]
    Stopped,
    /// Registering with collaborators; callbacks are dropped.
    Starting,
    /// Fully subscribed; callbacks are processed.
    Running,
    /// Tearing down; callbacks are dropped.
    Stopping,
}

impl BridgeState {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: BridgeState) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::Stopped) // startup rolled back
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }

    /// Whether collaborator callbacks should be processed in this state.
    pub fn accepts_callbacks(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
        }
    }
}

/// How a node decides whether it is primary for stale-announcement cleanup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PrimaryElection {
    /// Lowest `NodeId` in the membership view is primary.
    #[default]
    LowestNodeId,
    /// Trust `MembershipService::is_primary`.
    MembershipService,
}
