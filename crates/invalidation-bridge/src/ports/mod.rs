//! # Ports Module
//!
//! Hexagonal boundaries of the bridge.

pub mod inbound;
pub mod outbound;

pub use inbound::{BroadcastOutcome, InvalidationBridgeApi, RemoteInvalidationHandler};
pub use outbound::{
    AnnouncementListener, AnnouncementStore, LocalInvalidationRegistry, LocalRegistryListener,
    MembershipListener, MembershipService, RpcBroadcast, Subscription,
};
