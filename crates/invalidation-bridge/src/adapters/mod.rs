//! # Adapters Layer (Hexagonal Architecture)
//!
//! In-memory implementations of the outbound ports. They model one cluster
//! partition in a single process and back the tests and `bridge-sim`.

mod announcement_store;
mod listeners;
mod membership;
mod registry;
mod rpc_bus;

pub use announcement_store::{ReplicatedStore, StoreOp, StoreReplica};
pub use membership::{InMemoryMembership, MembershipHub};
pub use registry::InMemoryInvalidationRegistry;
pub use rpc_bus::{InMemoryRpcBus, RpcEndpoint, SentCall, DEFAULT_CALL_TIMEOUT};
