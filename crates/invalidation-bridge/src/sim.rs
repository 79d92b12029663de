//! # In-Process Cluster
//!
//! Wires one [`BridgeController`] per node to shared in-memory membership,
//! announcement store and RPC bus. Used by `bridge-sim` and the tests.

use crate::adapters::{
    InMemoryInvalidationRegistry, InMemoryMembership, InMemoryRpcBus, MembershipHub,
    ReplicatedStore, RpcEndpoint, StoreReplica,
};
use crate::config::BridgeConfig;
use crate::domain::{BridgeError, NodeId};
use crate::metrics::MetricsSnapshot;
use crate::service::{BridgeController, Collaborators};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// One simulated node and handles to its collaborators.
pub struct ClusterNode {
    /// Node identity.
    pub id: NodeId,
    /// The node's bridge.
    pub controller: Arc<BridgeController>,
    /// The node's cache.
    pub registry: Arc<InMemoryInvalidationRegistry>,
    /// The node's store replica.
    pub store: Arc<StoreReplica>,
    /// The node's RPC endpoint.
    pub rpc: Arc<RpcEndpoint>,
    /// The node's membership handle.
    pub membership: Arc<InMemoryMembership>,
}

/// Serializable per-node summary.
#[derive(Clone, Debug, Serialize)]
pub struct NodeReport {
    /// Node identity.
    pub node: String,
    /// Bridge state.
    pub state: String,
    /// Groups existing locally.
    pub local_groups: BTreeSet<String>,
    /// Groups maintained by some other node.
    pub bridged_groups: BTreeSet<String>,
    /// Bridge counters.
    pub metrics: MetricsSnapshot,
}

/// A partition of simulated nodes.
pub struct InMemoryCluster {
    config: BridgeConfig,
    /// Shared membership.
    pub membership: Arc<MembershipHub>,
    /// Shared announcement store.
    pub store: Arc<ReplicatedStore>,
    /// Shared RPC bus.
    pub bus: Arc<InMemoryRpcBus>,
    nodes: BTreeMap<NodeId, ClusterNode>,
}

impl InMemoryCluster {
    /// Empty cluster whose bridges use `config`.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_bus(config, InMemoryRpcBus::new())
    }

    /// Empty cluster on a caller-supplied bus.
    pub fn with_bus(config: BridgeConfig, bus: Arc<InMemoryRpcBus>) -> Self {
        Self {
            config,
            membership: MembershipHub::new(),
            store: ReplicatedStore::new(),
            bus,
            nodes: BTreeMap::new(),
        }
    }

    /// Join a node to the partition with a stopped bridge.
    pub async fn add_node(&mut self, id: impl Into<NodeId>) -> Result<&ClusterNode, BridgeError> {
        let id = id.into();
        let membership = self.membership.join(id.clone()).await;
        let store = self.store.replica(id.clone());
        let rpc = self.bus.endpoint(id.clone());
        let registry = Arc::new(InMemoryInvalidationRegistry::new());

        let controller = Arc::new(BridgeController::new(
            self.config.clone(),
            Collaborators {
                membership: membership.clone(),
                store: store.clone(),
                rpc: rpc.clone(),
                registry: registry.clone(),
            },
        )?);

        let node = ClusterNode {
            id: id.clone(),
            controller,
            registry,
            store,
            rpc,
            membership,
        };
        Ok(self.nodes.entry(id).or_insert(node))
    }

    /// Start every bridge, in node order.
    pub async fn start_all(&self) -> Result<(), BridgeError> {
        for node in self.nodes.values() {
            node.controller.start().await?;
        }
        Ok(())
    }

    /// Stop every bridge, in node order.
    pub async fn stop_all(&self) {
        for node in self.nodes.values() {
            node.controller.stop().await;
        }
    }

    /// Kill a node without a graceful stop; survivors see it leave.
    pub async fn crash(&mut self, id: &NodeId) {
        if let Some(node) = self.nodes.remove(id) {
            info!(node = %id, "[sim] Crashing node");
            drop(node);
        }
        self.membership.leave(id).await;
    }

    /// Node by id.
    pub fn node(&self, id: &str) -> Option<&ClusterNode> {
        self.nodes.get(&NodeId::new(id))
    }

    /// All nodes, in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values()
    }

    /// Wait for every async broadcast to be delivered.
    pub async fn settle(&self) {
        self.bus.flush().await;
    }

    /// Summary of every node.
    pub fn report(&self) -> Vec<NodeReport> {
        use crate::ports::LocalInvalidationRegistry;

        self.nodes
            .values()
            .map(|node| NodeReport {
                node: node.id.to_string(),
                state: node.controller.state().to_string(),
                local_groups: node.registry.current_group_names(),
                bridged_groups: node.controller.bridged_groups().groups().clone(),
                metrics: node.controller.metrics(),
            })
            .collect()
    }
}
