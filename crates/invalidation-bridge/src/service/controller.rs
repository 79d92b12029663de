//! # Bridge Controller
//!
//! Lifecycle owner of the bridge on one node.
//!
//! ## Responsibilities
//!
//! - Publish this node's group list into the announcement store
//! - Recompute the bridged-groups snapshot whenever the store changes
//! - Prune announcements left behind by dead nodes (primary only)
//! - Own the RPC handler registration and the three subscriptions
//!
//! ## Lifecycle
//!
//! ```text
//! STOPPED ──start()──→ STARTING ──→ RUNNING ──stop()──→ STOPPING ──→ STOPPED
//!                          │
//!                          └── registration failed (rolled back) ──→ STOPPED
//! ```
//!
//! Callbacks arriving outside `RUNNING` are dropped, not queued.

use crate::algorithms::{dead_announcement_owners, recompute_bridged_groups, Recomputation};
use crate::config::BridgeConfig;
use crate::domain::{
    Announcement, BatchEntry, BridgeError, BridgeState, BridgedGroups, CacheKey, DeliveryMode,
    InvalidationEvent, MembershipView, NodeId, PortError, PrimaryElection, StartupStage,
};
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::ports::{
    AnnouncementListener, AnnouncementStore, BroadcastOutcome, InvalidationBridgeApi,
    LocalInvalidationRegistry, LocalRegistryListener, MembershipListener, MembershipService,
    RemoteInvalidationHandler, RpcBroadcast, Subscription,
};
use crate::rpc::RpcHandlerSurface;
use crate::service::relay::{BridgedGroupsHandle, InvalidationRelay};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// External collaborators a bridge runs against.
#[derive(Clone)]
pub struct Collaborators {
    /// Membership service.
    pub membership: Arc<dyn MembershipService>,
    /// Replicated announcement store.
    pub store: Arc<dyn AnnouncementStore>,
    /// RPC broadcast substrate.
    pub rpc: Arc<dyn RpcBroadcast>,
    /// Local invalidation registry.
    pub registry: Arc<dyn LocalInvalidationRegistry>,
}

/// Bridge controller for one node.
///
/// ## Thread Safety
///
/// Shareable across tasks via `Arc`. `start`/`stop` are serialized with each
/// other; collaborator callbacks may run concurrently on any task.
pub struct BridgeController {
    core: Arc<BridgeCore>,
    /// Registry, store and membership subscriptions, in that order.
    subscriptions: Mutex<Vec<Subscription>>,
    lifecycle: tokio::sync::Mutex<()>,
}

/// State shared between the controller and the listeners it registers.
struct BridgeCore {
    config: BridgeConfig,
    local_node: NodeId,
    collaborators: Collaborators,
    state: RwLock<BridgeState>,
    bridged: BridgedGroupsHandle,
    generation: AtomicU64,
    /// Only one publish in flight at a time.
    publish_lock: tokio::sync::Mutex<()>,
    relay: Arc<InvalidationRelay>,
    metrics: Arc<BridgeMetrics>,
}

impl BridgeController {
    /// Create a stopped controller.
    pub fn new(config: BridgeConfig, collaborators: Collaborators) -> Result<Self, BridgeError> {
        config.validate()?;

        let local_node = collaborators.membership.local_node();
        let bridged: BridgedGroupsHandle = Arc::new(ArcSwap::from_pointee(BridgedGroups::default()));
        let metrics = Arc::new(BridgeMetrics::new());
        let relay = Arc::new(InvalidationRelay::new(
            config.channel_name.clone(),
            bridged.clone(),
            collaborators.rpc.clone(),
            collaborators.registry.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            core: Arc::new(BridgeCore {
                config,
                local_node,
                collaborators,
                state: RwLock::new(BridgeState::Stopped),
                bridged,
                generation: AtomicU64::new(0),
                publish_lock: tokio::sync::Mutex::new(()),
                relay,
                metrics,
            }),
            subscriptions: Mutex::new(Vec::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Register with every collaborator, publish local groups and compute the
    /// initial bridged groups.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Startup`] if membership is unreachable, the channel is
    /// already registered, or a subscription fails. Everything registered
    /// before the failure is released again.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.core.transition(BridgeState::Starting, "start")?;

        info!(
            node = %self.core.local_node,
            channel = %self.core.config.channel_name,
            "[bridge] Starting invalidation bridge"
        );

        match self.register().await {
            Ok(subscriptions) => *self.subscriptions.lock() = subscriptions,
            Err(e) => {
                error!(node = %self.core.local_node, error = %e, "[bridge] Startup failed");
                self.core.set_state(BridgeState::Stopped);
                return Err(e);
            }
        }

        self.core.set_state(BridgeState::Running);
        self.core.publish_local_groups().await;
        self.core.recompute().await;

        info!(
            node = %self.core.local_node,
            bridged = self.core.bridged.load().len(),
            "[bridge] Invalidation bridge running"
        );
        Ok(())
    }

    async fn register(&self) -> Result<Vec<Subscription>, BridgeError> {
        let core = &self.core;
        let channel = core.config.channel_name.as_str();

        core.collaborators
            .membership
            .current_members(channel)
            .await
            .map_err(|source| BridgeError::Startup {
                stage: StartupStage::Membership,
                source,
            })?;

        let handler: Arc<dyn RemoteInvalidationHandler> =
            Arc::new(RpcHandlerSurface::new(core.relay.clone()));
        core.collaborators
            .rpc
            .register_handler(channel, handler)
            .map_err(|source| BridgeError::Startup {
                stage: StartupStage::RpcRegistration,
                source,
            })?;

        match Self::subscribe_all(core) {
            Ok(subscriptions) => Ok(subscriptions),
            Err(e) => {
                if let Err(unregister) = core.collaborators.rpc.unregister_handler(channel) {
                    warn!(error = %unregister, "[bridge] Rollback could not unregister RPC handler");
                }
                Err(e)
            }
        }
    }

    /// Subscriptions taken so far are released on early return.
    fn subscribe_all(core: &Arc<BridgeCore>) -> Result<Vec<Subscription>, BridgeError> {
        let channel = core.config.channel_name.as_str();
        let startup = |stage: StartupStage| move |source: PortError| BridgeError::Startup { stage, source };

        let mut subscriptions = Vec::with_capacity(3);
        subscriptions.push(
            core.collaborators
                .registry
                .subscribe(core.clone())
                .map_err(startup(StartupStage::RegistrySubscription))?,
        );
        subscriptions.push(
            core.collaborators
                .store
                .subscribe(channel, core.clone())
                .map_err(startup(StartupStage::StoreSubscription))?,
        );
        subscriptions.push(
            core.collaborators
                .membership
                .subscribe(channel, core.clone())
                .map_err(startup(StartupStage::MembershipSubscription))?,
        );
        Ok(subscriptions)
    }

    /// Unregister, unsubscribe, withdraw this node's announcement and clear
    /// the bridged groups. Each step is best-effort; a no-op when stopped.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.core.state() == BridgeState::Stopped {
            debug!(node = %self.core.local_node, "[bridge] Stop requested while already stopped");
            return;
        }

        let core = &self.core;
        let channel = core.config.channel_name.as_str();
        core.set_state(BridgeState::Stopping);
        info!(node = %core.local_node, channel, "[bridge] Stopping invalidation bridge");

        if let Err(e) = core.collaborators.rpc.unregister_handler(channel) {
            warn!(error = %e, "[bridge] Failed to unregister RPC handler");
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            debug!(subscription = subscription.label(), "[bridge] Unsubscribing");
            subscription.unsubscribe();
        }

        // Waits out any in-flight publish; later ones see Stopping and bail.
        let publish = core.publish_lock.lock().await;
        match core
            .collaborators
            .store
            .remove(channel, core.local_node.as_str())
            .await
        {
            Ok(()) => BridgeMetrics::incr(&core.metrics.publishes),
            Err(source) => {
                let err = BridgeError::Publish(source);
                warn!(error = %err, "[bridge] Could not withdraw announcement on shutdown");
                BridgeMetrics::incr(&core.metrics.publish_failures);
            }
        }
        drop(publish);

        core.clear_bridged_groups();
        core.set_state(BridgeState::Stopped);
        info!(node = %core.local_node, "[bridge] Invalidation bridge stopped");
    }

    /// Write (or withdraw, if no groups exist) this node's announcement.
    ///
    /// Idempotent. Failures are logged and counted, never returned. A no-op
    /// unless running.
    pub async fn publish_local_groups(&self) {
        self.core.publish_local_groups().await;
    }

    /// Recompute the bridged groups from the store. Dropped unless running.
    pub async fn on_announcement_store_changed(&self) {
        self.core.on_announcements_changed().await;
    }

    /// Prune dead nodes' announcements if this node is primary. Dropped
    /// unless running.
    pub async fn on_membership_changed(&self, view: MembershipView) {
        MembershipListener::on_membership_changed(self.core.as_ref(), view).await;
    }

    /// Lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.core.state()
    }

    /// This node's identity.
    pub fn local_node(&self) -> &NodeId {
        &self.core.local_node
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    /// Current bridged-groups snapshot.
    pub fn bridged_groups(&self) -> Arc<BridgedGroups> {
        self.core.bridged.load_full()
    }

    /// The relay used for outbound and inbound invalidations.
    pub fn relay(&self) -> Arc<InvalidationRelay> {
        self.core.relay.clone()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        if self.core.state() == BridgeState::Stopped {
            return;
        }
        // The announcement stays behind until the primary prunes it.
        warn!(node = %self.core.local_node, "[bridge] Controller dropped without stop()");
        if let Err(e) = self
            .core
            .collaborators
            .rpc
            .unregister_handler(&self.core.config.channel_name)
        {
            debug!(error = %e, "[bridge] Failed to unregister RPC handler on drop");
        }
    }
}

#[async_trait]
impl InvalidationBridgeApi for BridgeController {
    async fn invalidate(
        &self,
        group: &str,
        key: CacheKey,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        self.core.relay.invalidate(group, key, mode).await
    }

    async fn invalidate_many(
        &self,
        group: &str,
        keys: Vec<CacheKey>,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        self.core.relay.invalidate_many(group, keys, mode).await
    }

    async fn batch_invalidate(
        &self,
        entries: Vec<BatchEntry>,
        mode: DeliveryMode,
    ) -> BroadcastOutcome {
        self.core.relay.batch_invalidate(entries, mode).await
    }

    fn bridged_groups(&self) -> Arc<BridgedGroups> {
        BridgeController::bridged_groups(self)
    }
}

impl BridgeCore {
    fn state(&self) -> BridgeState {
        *self.state.read()
    }

    fn set_state(&self, next: BridgeState) {
        *self.state.write() = next;
    }

    fn transition(&self, next: BridgeState, operation: &'static str) -> Result<(), BridgeError> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(BridgeError::InvalidState {
                state: *state,
                operation,
            });
        }
        *state = next;
        Ok(())
    }

    fn accepts_callbacks(&self, callback: &'static str) -> bool {
        let state = self.state();
        if !state.accepts_callbacks() {
            debug!(node = %self.local_node, %state, callback, "[bridge] Callback dropped");
            return false;
        }
        true
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn publish_local_groups(&self) {
        let _publish = self.publish_lock.lock().await;
        let channel = self.config.channel_name.as_str();
        let key = self.local_node.as_str();
        let state = self.state();
        if state != BridgeState::Running {
            debug!(node = %self.local_node, ?state, "[bridge] Not running, publish skipped");
            return;
        }

        // Always recomputed from the authoritative group list, never a diff.
        let groups = self.collaborators.registry.current_group_names();
        let count = groups.len();
        let result = if groups.is_empty() {
            self.collaborators.store.remove(channel, key).await
        } else {
            match Announcement::new(self.local_node.clone(), groups).encode() {
                Ok(bytes) => self.collaborators.store.set(channel, key, bytes).await,
                Err(e) => Err(PortError::Rejected(e.to_string())),
            }
        };

        match result {
            Ok(()) => {
                debug!(node = %self.local_node, groups = count, "[bridge] Announcement published");
                BridgeMetrics::incr(&self.metrics.publishes);
            }
            Err(source) => {
                // Prior announcement stays until the next group change.
                let err = BridgeError::Publish(source);
                warn!(node = %self.local_node, error = %err, "[bridge] Announcement publish failed");
                BridgeMetrics::incr(&self.metrics.publish_failures);
            }
        }
    }

    async fn recompute(&self) {
        // Taken before reading so a later read always carries a higher generation.
        let generation = self.next_generation();

        let entries = match self
            .collaborators
            .store
            .get_all(&self.config.channel_name)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    node = %self.local_node,
                    error = %e,
                    "[bridge] Could not read announcements, keeping previous bridged groups"
                );
                return;
            }
        };

        let Recomputation {
            snapshot,
            malformed,
            absent,
        } = recompute_bridged_groups(&self.local_node, &entries, generation);

        for err in &malformed {
            warn!(node = %self.local_node, error = %err, "[bridge] Skipping malformed announcement");
        }
        if !absent.is_empty() {
            debug!(node = %self.local_node, ?absent, "[bridge] Skipping absent announcements");
        }
        BridgeMetrics::add(&self.metrics.malformed_announcements, malformed.len() as u64);
        BridgeMetrics::incr(&self.metrics.recomputations);

        let next = Arc::new(snapshot);
        self.bridged.rcu(|current| {
            if current.generation() > next.generation() {
                Arc::clone(current)
            } else {
                Arc::clone(&next)
            }
        });

        debug!(
            node = %self.local_node,
            generation,
            groups = ?next.groups(),
            "[bridge] Bridged groups recomputed"
        );
    }

    fn clear_bridged_groups(&self) {
        let cleared = Arc::new(BridgedGroups::new(Default::default(), self.next_generation()));
        self.bridged.store(cleared);
    }

    async fn is_primary(&self, view: &MembershipView) -> bool {
        match self.config.primary_election {
            PrimaryElection::LowestNodeId => view.is_primary(&self.local_node),
            PrimaryElection::MembershipService => match self
                .collaborators
                .membership
                .is_primary(&self.config.channel_name)
                .await
            {
                Ok(primary) => primary,
                Err(e) => {
                    warn!(error = %e, "[bridge] Primary check failed, skipping cleanup");
                    false
                }
            },
        }
    }

    async fn prune_stale_announcements(&self, view: MembershipView) {
        if !self.is_primary(&view).await {
            debug!(node = %self.local_node, primary = ?view.primary(), "[bridge] Not primary, no cleanup");
            return;
        }

        let channel = self.config.channel_name.as_str();
        let entries = match self.collaborators.store.get_all(channel).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(node = %self.local_node, error = %e, "[bridge] Could not read announcements for cleanup");
                return;
            }
        };

        for node in dead_announcement_owners(entries.keys(), &view) {
            match self.collaborators.store.remove(channel, node.as_str()).await {
                Ok(()) => {
                    info!(dead = %node, "[bridge] Removed stale announcement");
                    BridgeMetrics::incr(&self.metrics.pruned_announcements);
                }
                Err(source) => {
                    let err = BridgeError::Cleanup { node, source };
                    warn!(error = %err, "[bridge] Stale announcement cleanup failed, continuing");
                    BridgeMetrics::incr(&self.metrics.prune_failures);
                }
            }
        }
    }
}

#[async_trait]
impl AnnouncementListener for BridgeCore {
    async fn on_announcements_changed(&self) {
        if self.accepts_callbacks("announcements_changed") {
            self.recompute().await;
        }
    }
}

#[async_trait]
impl MembershipListener for BridgeCore {
    async fn on_membership_changed(&self, view: MembershipView) {
        if self.accepts_callbacks("membership_changed") {
            self.prune_stale_announcements(view).await;
        }
    }
}

#[async_trait]
impl LocalRegistryListener for BridgeCore {
    async fn on_group_created(&self, group: &str) {
        if self.accepts_callbacks("group_created") {
            debug!(node = %self.local_node, group, "[bridge] Local group created");
            self.publish_local_groups().await;
        }
    }

    async fn on_group_dropped(&self, group: &str) {
        if self.accepts_callbacks("group_dropped") {
            debug!(node = %self.local_node, group, "[bridge] Local group dropped");
            self.publish_local_groups().await;
        }
    }

    async fn on_local_invalidate(&self, event: InvalidationEvent, mode: DeliveryMode) {
        if self.accepts_callbacks("local_invalidate") {
            self.relay.on_local_invalidate(event, mode).await;
        }
    }
}
