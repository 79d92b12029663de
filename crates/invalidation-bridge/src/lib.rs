//! # Invalidation Bridge
//!
//! Cluster-wide cache invalidation for per-node caches.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Each node caches data in named invalidation groups. When local code
//! invalidates a key, every other node maintaining that group must evict it
//! too, and nodes that do not maintain the group should not be bothered:
//!
//! - Each node announces its group names in a replicated store
//! - Each node derives the set of groups some *other* node maintains
//! - Outbound invalidations are broadcast only for those groups
//! - Inbound invalidations are applied locally and never re-broadcast
//! - The primary node prunes announcements left by dead nodes
//!
//! ## Module Structure
//!
//! ```text
//! invalidation-bridge/
//! ├── domain/          # NodeId, InvalidationEvent, BridgedGroups, errors
//! ├── algorithms/      # Bridged-group recomputation, gating, pruning
//! ├── ports/           # Inbound API + outbound collaborator traits
//! ├── service/         # BridgeController, InvalidationRelay
//! ├── rpc/             # Remote entry points registered with the substrate
//! ├── adapters/        # In-memory membership, store, RPC bus, registry
//! └── sim              # In-process cluster wiring
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod rpc;
pub mod service;
pub mod sim;

// Re-exports
pub use algorithms::{
    dead_announcement_owners, elect_primary, filter_batch, is_bridged, recompute_bridged_groups,
    Recomputation,
};
pub use config::{BridgeConfig, DEFAULT_CHANNEL_NAME};
pub use domain::{
    Announcement, BatchEntry, BridgeError, BridgeState, BridgedGroups, CacheKey, DeliveryMode,
    InvalidationEvent, MembershipView, NodeId, PortError, PrimaryElection, StartupStage,
};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use ports::{
    AnnouncementListener, AnnouncementStore, BroadcastOutcome, InvalidationBridgeApi,
    LocalInvalidationRegistry, LocalRegistryListener, MembershipListener, MembershipService,
    RemoteInvalidationHandler, RpcBroadcast, Subscription,
};
pub use rpc::RpcHandlerSurface;
pub use service::{BridgeController, BridgedGroupsHandle, Collaborators, InvalidationRelay};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
