//! # Bridge Service
//!
//! `BridgeController` owns the lifecycle and the bridged-groups snapshot;
//! `InvalidationRelay` gates outbound events and applies inbound ones.

mod controller;
mod relay;

pub use controller::{BridgeController, Collaborators};
pub use relay::{BridgedGroupsHandle, InvalidationRelay};

#[cfg(test)]
mod tests;
