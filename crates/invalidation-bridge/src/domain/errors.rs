//! # Domain Errors
//!
//! Error types for the invalidation bridge.
//!
//! Only [`BridgeError::Startup`] and [`BridgeError::InvalidState`] ever reach a
//! caller. Every other variant is produced at a collaborator boundary, logged,
//! and dropped.

use super::value_objects::{BridgeState, NodeId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an external collaborator (membership, store, RPC, registry).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// The collaborator could not be reached.
    #[error("Collaborator unreachable: {0}")]
    Unreachable(String),

    /// A handler is already registered under this channel.
    #[error("Channel name collision: {0}")]
    NameCollision(String),

    /// No handler is registered under this channel.
    #[error("Channel not registered: {0}")]
    NotRegistered(String),

    /// The call did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator refused the request.
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Step of `BridgeController::start` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    /// Probing the membership service for the channel.
    Membership,
    /// Registering the RPC handler.
    RpcRegistration,
    /// Subscribing to local group events.
    RegistrySubscription,
    /// Subscribing to announcement store changes.
    StoreSubscription,
    /// Subscribing to membership changes.
    MembershipSubscription,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Membership => write!(f, "membership check"),
            Self::RpcRegistration => write!(f, "rpc handler registration"),
            Self::RegistrySubscription => write!(f, "local registry subscription"),
            Self::StoreSubscription => write!(f, "announcement store subscription"),
            Self::MembershipSubscription => write!(f, "membership subscription"),
        }
    }
}

/// Bridge error taxonomy.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Registration or subscription failed during start. Fatal to the instance.
    #[error("Bridge startup failed at {stage}: {source}")]
    Startup {
        /// Step that failed
        stage: StartupStage,
        /// Collaborator failure
        #[source]
        source: PortError,
    },

    /// Writing or removing this node's announcement failed.
    #[error("Announcement publish failed: {0}")]
    Publish(#[source] PortError),

    /// An outbound invalidation broadcast failed or timed out.
    #[error("Invalidation broadcast failed for {groups:?}: {source}")]
    Broadcast {
        /// Groups carried by the failed call
        groups: Vec<String>,
        /// Collaborator failure
        #[source]
        source: PortError,
    },

    /// Removing a dead node's announcement failed.
    #[error("Cleanup of announcement for {node} failed: {source}")]
    Cleanup {
        /// Owner of the stale announcement
        node: NodeId,
        /// Collaborator failure
        #[source]
        source: PortError,
    },

    /// An announcement store entry could not be interpreted.
    #[error("Malformed announcement under key {key:?}: {reason}")]
    MalformedAnnouncement {
        /// Store key of the entry
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Lifecycle operation invoked in the wrong state.
    #[error("Cannot {operation} while bridge is {state}")]
    InvalidState {
        /// Current lifecycle state
        state: BridgeState,
        /// Attempted operation
        operation: &'static str,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
