//! In-memory membership service.
//!
//! One [`MembershipHub`] models a partition; each node gets an
//! [`InMemoryMembership`] handle. A node that leaves is treated as crashed:
//! its listeners are discarded without being told.

use super::listeners::ListenerSet;
use crate::domain::{MembershipView, NodeId, PortError};
use crate::ports::{MembershipListener, MembershipService, Subscription};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct HubState {
    members: BTreeSet<NodeId>,
    unreachable: BTreeSet<NodeId>,
    /// Explicit primary, overriding lowest-id election when set.
    primary_override: Option<NodeId>,
}

/// Shared membership of one partition.
pub struct MembershipHub {
    state: RwLock<HubState>,
    listeners: RwLock<BTreeMap<NodeId, Arc<ListenerSet<dyn MembershipListener>>>>,
}

impl MembershipHub {
    /// Create an empty partition.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HubState::default()),
            listeners: RwLock::new(BTreeMap::new()),
        })
    }

    /// Handle for `node` without changing membership.
    pub fn handle(self: &Arc<Self>, node: impl Into<NodeId>) -> Arc<InMemoryMembership> {
        Arc::new(InMemoryMembership {
            hub: Arc::clone(self),
            node: node.into(),
        })
    }

    /// Add `node` and notify every registered listener.
    pub async fn join(self: &Arc<Self>, node: impl Into<NodeId>) -> Arc<InMemoryMembership> {
        let node = node.into();
        let view = {
            let mut state = self.state.write();
            state.members.insert(node.clone());
            MembershipView::new(state.members.clone())
        };
        debug!(%node, members = view.members().len(), "[membership] Node joined");
        self.notify(view).await;
        self.handle(node)
    }

    /// Remove `node` as if it crashed and notify the survivors.
    pub async fn leave(&self, node: &NodeId) {
        let view = {
            let mut state = self.state.write();
            if !state.members.remove(node) {
                return;
            }
            if state.primary_override.as_ref() == Some(node) {
                state.primary_override = None;
            }
            MembershipView::new(state.members.clone())
        };
        if let Some(listeners) = self.listeners.write().remove(node) {
            listeners.clear();
        }
        debug!(%node, members = view.members().len(), "[membership] Node left");
        self.notify(view).await;
    }

    /// Make `current_members` fail for `node`.
    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        let mut state = self.state.write();
        if unreachable {
            state.unreachable.insert(node.clone());
        } else {
            state.unreachable.remove(node);
        }
    }

    /// Designate a primary other than the lowest id.
    pub fn set_primary(&self, node: Option<NodeId>) {
        self.state.write().primary_override = node;
    }

    /// Current alive members.
    pub fn members(&self) -> BTreeSet<NodeId> {
        self.state.read().members.clone()
    }

    /// Current view.
    pub fn view(&self) -> MembershipView {
        MembershipView::new(self.members())
    }

    /// Deliver `view` to every live node's listeners, one at a time.
    pub async fn notify(&self, view: MembershipView) {
        let sets: Vec<_> = self.listeners.read().values().cloned().collect();
        for listener in sets.iter().flat_map(|set| set.snapshot()) {
            listener.on_membership_changed(view.clone()).await;
        }
    }

    fn listeners_for(&self, node: &NodeId) -> Arc<ListenerSet<dyn MembershipListener>> {
        self.listeners
            .write()
            .entry(node.clone())
            .or_insert_with(|| Arc::new(ListenerSet::new()))
            .clone()
    }
}

/// One node's view of a [`MembershipHub`].
pub struct InMemoryMembership {
    hub: Arc<MembershipHub>,
    node: NodeId,
}

impl InMemoryMembership {
    /// The partition this handle belongs to.
    pub fn hub(&self) -> &Arc<MembershipHub> {
        &self.hub
    }
}

#[async_trait]
impl MembershipService for InMemoryMembership {
    fn local_node(&self) -> NodeId {
        self.node.clone()
    }

    async fn current_members(&self, channel: &str) -> Result<BTreeSet<NodeId>, PortError> {
        let state = self.hub.state.read();
        if state.unreachable.contains(&self.node) {
            return Err(PortError::Unreachable(format!("membership for {channel}")));
        }
        Ok(state.members.clone())
    }

    async fn is_primary(&self, channel: &str) -> Result<bool, PortError> {
        let members = self.current_members(channel).await?;
        let overridden = self.hub.state.read().primary_override.clone();
        let primary = overridden.or_else(|| MembershipView::new(members).primary().cloned());
        Ok(primary.as_ref() == Some(&self.node))
    }

    fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<Subscription, PortError> {
        Ok(self
            .hub
            .listeners_for(&self.node)
            .add(format!("membership:{channel}"), listener))
    }
}
