//! # Algorithms Module
//!
//! Pure decision logic used by the controller and relay: bridged-group
//! recomputation, outbound gating, and stale-announcement pruning.

pub mod bridged_groups;
pub mod gating;
pub mod pruning;

pub use bridged_groups::{recompute_bridged_groups, Recomputation};
pub use gating::{filter_batch, is_bridged};
pub use pruning::{dead_announcement_owners, elect_primary};
