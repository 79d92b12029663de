use super::*;
use crate::adapters::{
    InMemoryInvalidationRegistry, InMemoryRpcBus, MembershipHub, ReplicatedStore, StoreReplica,
};
use crate::config::BridgeConfig;
use crate::domain::{
    Announcement, BatchEntry, BridgeError, BridgeState, BridgedGroups, DeliveryMode,
    InvalidationEvent, NodeId, PortError, PrimaryElection, StartupStage,
};
use crate::metrics::BridgeMetrics;
use crate::ports::{
    AnnouncementListener, AnnouncementStore, BroadcastOutcome, InvalidationBridgeApi,
    LocalInvalidationRegistry, RpcBroadcast, Subscription,
};
use crate::sim::InMemoryCluster;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

const CHANNEL: &str = "cache-invalidation";

fn groups(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Relay
// =============================================================================

struct RelayFixture {
    relay: InvalidationRelay,
    bus: Arc<InMemoryRpcBus>,
    metrics: Arc<BridgeMetrics>,
}

fn relay_with(bridged: &[&str]) -> RelayFixture {
    let bus = InMemoryRpcBus::new();
    let peer = Arc::new(InMemoryInvalidationRegistry::new());
    let peer_relay = Arc::new(InvalidationRelay::new(
        CHANNEL,
        Arc::new(ArcSwap::from_pointee(BridgedGroups::default())),
        bus.endpoint("b"),
        peer,
        Arc::new(BridgeMetrics::new()),
    ));
    bus.endpoint("b")
        .register_handler(CHANNEL, Arc::new(crate::rpc::RpcHandlerSurface::new(peer_relay)))
        .unwrap();

    let metrics = Arc::new(BridgeMetrics::new());
    let relay = InvalidationRelay::new(
        CHANNEL,
        Arc::new(ArcSwap::from_pointee(BridgedGroups::new(groups(bridged), 1))),
        bus.endpoint("a"),
        Arc::new(InMemoryInvalidationRegistry::new()),
        metrics.clone(),
    );
    RelayFixture {
        relay,
        bus,
        metrics,
    }
}

#[tokio::test]
async fn test_unbridged_group_makes_no_network_call() {
    let fx = relay_with(&["orders"]);

    let outcome = fx
        .relay
        .invalidate("inventory", "7".into(), DeliveryMode::Sync)
        .await;

    assert_eq!(outcome, BroadcastOutcome::Suppressed);
    assert!(fx.bus.sent().is_empty());
    assert_eq!(fx.metrics.snapshot().broadcasts_suppressed, 1);
}

#[tokio::test]
async fn test_bridged_group_broadcasts_once() {
    let fx = relay_with(&["orders"]);

    let outcome = fx
        .relay
        .invalidate_many("orders", vec!["1".into(), "2".into()], DeliveryMode::Sync)
        .await;

    assert_eq!(outcome, BroadcastOutcome::Sent);
    let sent = fx.bus.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event.method_name(), "invalidate_many");
    assert_eq!(sent[0].event.key_count(), 2);
}

#[tokio::test]
async fn test_empty_key_list_is_not_sent() {
    let fx = relay_with(&["orders"]);

    let outcome = fx
        .relay
        .invalidate_many("orders", vec![], DeliveryMode::Sync)
        .await;

    assert_eq!(outcome, BroadcastOutcome::Suppressed);
    assert!(fx.bus.sent().is_empty());
}

#[tokio::test]
async fn test_batch_sends_only_bridged_entries() {
    let fx = relay_with(&["A"]);

    let outcome = fx
        .relay
        .batch_invalidate(
            vec![
                BatchEntry::new("A", vec!["k1".into()]),
                BatchEntry::new("B", vec!["k2".into()]),
            ],
            DeliveryMode::Sync,
        )
        .await;

    assert_eq!(outcome, BroadcastOutcome::Sent);
    let sent = fx.bus.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].event,
        InvalidationEvent::batch(vec![BatchEntry::new("A", vec!["k1".into()])])
    );
}

#[tokio::test]
async fn test_batch_with_nothing_bridged_is_not_sent() {
    let fx = relay_with(&[]);

    let outcome = fx
        .relay
        .batch_invalidate(
            vec![
                BatchEntry::new("A", vec!["k1".into()]),
                BatchEntry::new("B", vec!["k2".into()]),
            ],
            DeliveryMode::Async,
        )
        .await;

    assert_eq!(outcome, BroadcastOutcome::Suppressed);
    assert!(fx.bus.sent().is_empty());
}

#[tokio::test]
async fn test_broadcast_failure_is_swallowed_and_counted() {
    let fx = relay_with(&["orders"]);
    fx.bus.set_unreachable(&NodeId::new("b"), true);

    let outcome = fx
        .relay
        .invalidate("orders", "1".into(), DeliveryMode::Sync)
        .await;

    assert_eq!(outcome, BroadcastOutcome::Failed);
    let metrics = fx.metrics.snapshot();
    assert_eq!(metrics.broadcast_failures, 1);
    assert_eq!(metrics.broadcasts_sent, 0);
}

#[tokio::test]
async fn test_remote_event_is_applied_without_rebroadcast() {
    let bus = InMemoryRpcBus::new();
    let registry = Arc::new(InMemoryInvalidationRegistry::new());
    registry.create_group("orders").await;
    registry.put("orders", "42");
    let metrics = Arc::new(BridgeMetrics::new());
    // Bridged on this node too: applying must still not send anything.
    let relay = InvalidationRelay::new(
        CHANNEL,
        Arc::new(ArcSwap::from_pointee(BridgedGroups::new(groups(&["orders"]), 1))),
        bus.endpoint("a"),
        registry.clone(),
        metrics.clone(),
    );

    relay
        .on_remote_invalidate(InvalidationEvent::single("orders", "42"))
        .await;

    assert!(!registry.contains("orders", "42"));
    assert!(bus.sent().is_empty());
    assert_eq!(metrics.snapshot().remote_events_applied, 1);
}

#[tokio::test]
async fn test_remote_apply_is_idempotent() {
    let bus = InMemoryRpcBus::new();
    let registry = Arc::new(InMemoryInvalidationRegistry::new());
    registry.create_group("orders").await;
    registry.put("orders", "1");
    registry.put("orders", "2");
    let relay = InvalidationRelay::new(
        CHANNEL,
        Arc::new(ArcSwap::from_pointee(BridgedGroups::default())),
        bus.endpoint("a"),
        registry.clone(),
        Arc::new(BridgeMetrics::new()),
    );
    let event = InvalidationEvent::many("orders", vec!["1".into()]);

    relay.on_remote_invalidate(event.clone()).await;
    let once = registry.keys("orders");
    relay.on_remote_invalidate(event).await;

    assert_eq!(registry.keys("orders"), once);
    assert!(registry.contains("orders", "2"));
}

#[tokio::test]
async fn test_registry_rejection_is_counted() {
    let bus = InMemoryRpcBus::new();
    let registry = Arc::new(InMemoryInvalidationRegistry::new());
    registry.set_rejecting(true);
    let metrics = Arc::new(BridgeMetrics::new());
    let relay = InvalidationRelay::new(
        CHANNEL,
        Arc::new(ArcSwap::from_pointee(BridgedGroups::default())),
        bus.endpoint("a"),
        registry,
        metrics.clone(),
    );

    relay
        .on_remote_invalidate(InvalidationEvent::single("orders", "1"))
        .await;

    assert_eq!(metrics.snapshot().remote_apply_failures, 1);
}

mod gating_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn broadcasts_iff_group_is_bridged(
            bridged in proptest::collection::btree_set("[a-d]", 0..4),
            group in "[a-d]",
        ) {
            let names: Vec<&str> = bridged.iter().map(String::as_str).collect();
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let sent = rt.block_on(async {
                let fx = relay_with(&names);
                fx.relay
                    .invalidate(&group, "k".into(), DeliveryMode::Sync)
                    .await;
                fx.bus.sent().len()
            });

            prop_assert_eq!(sent == 0, !bridged.contains(&group));
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

async fn cluster_of(nodes: &[(&str, &[&str])]) -> InMemoryCluster {
    cluster_with(BridgeConfig::for_channel(CHANNEL), nodes).await
}

async fn cluster_with(config: BridgeConfig, nodes: &[(&str, &[&str])]) -> InMemoryCluster {
    let mut cluster = InMemoryCluster::new(config);
    for (id, names) in nodes {
        let node = cluster.add_node(*id).await.unwrap();
        for name in names.iter() {
            node.registry.create_group(name).await;
        }
    }
    cluster
}

#[tokio::test]
async fn test_two_node_scenario() {
    let cluster = cluster_of(&[("x", &["orders"]), ("y", &["orders", "users"])]).await;
    cluster.start_all().await.unwrap();

    let x = cluster.node("x").unwrap();
    let y = cluster.node("y").unwrap();
    assert_eq!(*x.controller.bridged_groups().groups(), groups(&["orders", "users"]));
    assert_eq!(*y.controller.bridged_groups().groups(), groups(&["orders"]));

    y.registry.put("orders", "42");
    let sent = x
        .controller
        .invalidate("orders", "42".into(), DeliveryMode::Sync)
        .await;
    let suppressed = x
        .controller
        .invalidate("inventory", "7".into(), DeliveryMode::Sync)
        .await;

    assert_eq!(sent, BroadcastOutcome::Sent);
    assert_eq!(suppressed, BroadcastOutcome::Suppressed);
    assert!(!y.registry.contains("orders", "42"));
    assert_eq!(cluster.bus.sent_by(&NodeId::new("x")).len(), 1);
    // The receiving side never forwards.
    assert!(cluster.bus.sent_by(&NodeId::new("y")).is_empty());
}

#[tokio::test]
async fn test_local_registry_invalidation_flows_through_bridge() {
    let cluster = cluster_of(&[("x", &["orders"]), ("y", &["orders"])]).await;
    cluster.start_all().await.unwrap();
    let x = cluster.node("x").unwrap();
    let y = cluster.node("y").unwrap();
    x.registry.put("orders", "1");
    y.registry.put("orders", "1");

    x.registry
        .invalidate_key("orders", "1", DeliveryMode::Async)
        .await;
    cluster.settle().await;

    assert!(!x.registry.contains("orders", "1"));
    assert!(!y.registry.contains("orders", "1"));
}

#[tokio::test]
async fn test_group_changes_republish() {
    let cluster = cluster_of(&[("x", &["orders"]), ("y", &[])]).await;
    cluster.start_all().await.unwrap();
    let x = cluster.node("x").unwrap();
    let y = cluster.node("y").unwrap();
    assert!(y.controller.bridged_groups().contains("orders"));
    // A node with nothing to bridge publishes nothing.
    assert!(!cluster.store.keys(CHANNEL).contains("y"));

    y.registry.create_group("users").await;
    assert!(x.controller.bridged_groups().contains("users"));

    x.registry.drop_group("orders").await;
    assert!(!cluster.store.keys(CHANNEL).contains("x"));
    assert!(y.controller.bridged_groups().is_empty());
}

#[tokio::test]
async fn test_publish_is_idempotent() {
    let cluster = cluster_of(&[("x", &["orders"])]).await;
    cluster.start_all().await.unwrap();
    let x = cluster.node("x").unwrap();
    let before = cluster.store.entries(CHANNEL);

    x.controller.publish_local_groups().await;
    x.controller.publish_local_groups().await;

    assert_eq!(cluster.store.entries(CHANNEL), before);
}

#[tokio::test]
async fn test_malformed_and_absent_entries_are_skipped() {
    let cluster = cluster_of(&[("x", &["orders"]), ("y", &["users"])]).await;
    cluster.start_all().await.unwrap();

    cluster
        .store
        .put_raw(CHANNEL, "ghost", Some(b"not json".to_vec()))
        .await;
    cluster.store.put_raw(CHANNEL, "void", None).await;

    let x = cluster.node("x").unwrap();
    assert_eq!(*x.controller.bridged_groups().groups(), groups(&["users"]));
    assert!(x.controller.metrics().malformed_announcements >= 1);
}

#[tokio::test]
async fn test_leader_only_cleanup() {
    let mut cluster = cluster_of(&[
        ("p", &["orders"]),
        ("q", &["orders", "q-only"]),
        ("r", &["orders"]),
    ])
    .await;
    cluster.start_all().await.unwrap();
    assert!(cluster.node("r").unwrap().controller.bridged_groups().contains("q-only"));

    cluster.crash(&NodeId::new("q")).await;

    let p = cluster.node("p").unwrap();
    let r = cluster.node("r").unwrap();
    assert_eq!(p.store.remove_calls(), vec!["q".to_string()]);
    assert!(r.store.remove_calls().is_empty());
    assert!(!cluster.store.keys(CHANNEL).contains("q"));
    for node in cluster.nodes() {
        assert!(!node.controller.bridged_groups().contains("q-only"));
    }
    assert_eq!(p.controller.metrics().pruned_announcements, 1);
}

#[tokio::test]
async fn test_cleanup_continues_past_failed_removal() {
    let mut cluster = cluster_of(&[
        ("a", &["g"]),
        ("b", &["g"]),
        ("c", &["g"]),
        ("d", &["g"]),
    ])
    .await;
    cluster.start_all().await.unwrap();
    cluster.node("a").unwrap().store.reject_key("c");

    cluster.crash(&NodeId::new("c")).await;
    cluster.crash(&NodeId::new("d")).await;

    let keys = cluster.store.keys(CHANNEL);
    assert!(keys.contains("c"));
    assert!(!keys.contains("d"));
    let metrics = cluster.node("a").unwrap().controller.metrics();
    assert_eq!(metrics.prune_failures, 2);
    assert_eq!(metrics.pruned_announcements, 1);
}

#[tokio::test]
async fn test_membership_service_election() {
    let config = BridgeConfig::for_channel(CHANNEL)
        .with_primary_election(PrimaryElection::MembershipService);
    let mut cluster = cluster_with(config, &[("p", &["g"]), ("q", &["g"]), ("r", &["g"])]).await;
    cluster.start_all().await.unwrap();
    cluster.membership.set_primary(Some(NodeId::new("r")));

    cluster.crash(&NodeId::new("q")).await;

    assert!(cluster.node("p").unwrap().store.remove_calls().is_empty());
    assert_eq!(
        cluster.node("r").unwrap().store.remove_calls(),
        vec!["q".to_string()]
    );
}

#[tokio::test]
async fn test_name_collision_rolls_back_startup() {
    let cluster = cluster_of(&[("x", &["orders"])]).await;
    let x = cluster.node("x").unwrap();
    let squatter = Arc::new(InMemoryInvalidationRegistry::new());
    let squatter_relay = Arc::new(InvalidationRelay::new(
        CHANNEL,
        Arc::new(ArcSwap::from_pointee(BridgedGroups::default())),
        x.rpc.clone(),
        squatter,
        Arc::new(BridgeMetrics::new()),
    ));
    x.rpc
        .register_handler(CHANNEL, Arc::new(crate::rpc::RpcHandlerSurface::new(squatter_relay)))
        .unwrap();

    let result = x.controller.start().await;

    assert!(matches!(
        result,
        Err(BridgeError::Startup {
            stage: StartupStage::RpcRegistration,
            ..
        })
    ));
    assert_eq!(x.controller.state(), BridgeState::Stopped);
    assert_eq!(x.registry.listener_count(), 0);
    assert!(cluster.store.keys(CHANNEL).is_empty());
    // The pre-existing handler is left alone.
    assert!(cluster.bus.is_registered(CHANNEL, &NodeId::new("x")));
}

#[tokio::test]
async fn test_unreachable_membership_fails_startup() {
    let cluster = cluster_of(&[("x", &["orders"])]).await;
    cluster.membership.set_unreachable(&NodeId::new("x"), true);
    let x = cluster.node("x").unwrap();

    let result = x.controller.start().await;

    assert!(matches!(
        result,
        Err(BridgeError::Startup {
            stage: StartupStage::Membership,
            ..
        })
    ));
    assert!(!cluster.bus.is_registered(CHANNEL, &NodeId::new("x")));

    cluster.membership.set_unreachable(&NodeId::new("x"), false);
    x.controller.start().await.unwrap();
    assert_eq!(x.controller.state(), BridgeState::Running);
}

#[tokio::test]
async fn test_store_subscription_failure_releases_everything() {
    let cluster = cluster_of(&[("x", &["orders"])]).await;
    let x = cluster.node("x").unwrap();
    x.store.set_unreachable(true);

    let result = x.controller.start().await;

    assert!(matches!(
        result,
        Err(BridgeError::Startup {
            stage: StartupStage::StoreSubscription,
            ..
        })
    ));
    assert_eq!(x.registry.listener_count(), 0);
    assert!(!cluster.bus.is_registered(CHANNEL, &NodeId::new("x")));
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let cluster = cluster_of(&[("x", &["orders"])]).await;
    let x = cluster.node("x").unwrap();
    x.controller.start().await.unwrap();

    let result = x.controller.start().await;

    assert!(matches!(
        result,
        Err(BridgeError::InvalidState {
            state: BridgeState::Running,
            ..
        })
    ));
}

#[tokio::test]
async fn test_stop_releases_everything() {
    let cluster = cluster_of(&[("x", &["orders"]), ("y", &["orders"])]).await;
    cluster.start_all().await.unwrap();
    let x = cluster.node("x").unwrap();
    let y = cluster.node("y").unwrap();

    x.controller.stop().await;

    assert_eq!(x.controller.state(), BridgeState::Stopped);
    assert!(!cluster.bus.is_registered(CHANNEL, &NodeId::new("x")));
    assert!(!cluster.store.keys(CHANNEL).contains("x"));
    assert!(x.controller.bridged_groups().is_empty());
    assert_eq!(x.registry.listener_count(), 0);
    assert!(y.controller.bridged_groups().is_empty());

    // Second stop is a no-op; the bridge can be started again.
    x.controller.stop().await;
    x.controller.start().await.unwrap();
    assert!(y.controller.bridged_groups().contains("orders"));
}

#[tokio::test]
async fn test_callbacks_dropped_unless_running() {
    let cluster = cluster_of(&[("x", &["orders"]), ("y", &["users"])]).await;
    cluster.node("y").unwrap().controller.start().await.unwrap();
    let x = cluster.node("x").unwrap();

    x.controller.on_announcement_store_changed().await;
    x.controller.on_membership_changed(cluster.membership.view()).await;

    assert!(x.controller.bridged_groups().is_empty());
    let metrics = x.controller.metrics();
    assert_eq!(metrics.recomputations, 0);
    assert!(x.store.ops().is_empty());
}

#[tokio::test]
async fn test_drop_without_stop_unregisters_handler() {
    let mut cluster = cluster_of(&[("x", &["orders"]), ("y", &["orders"])]).await;
    cluster.start_all().await.unwrap();

    cluster.crash(&NodeId::new("y")).await;

    assert!(!cluster.bus.is_registered(CHANNEL, &NodeId::new("y")));
    assert!(!cluster.store.keys(CHANNEL).contains("y"));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let bus = InMemoryRpcBus::new();
    let mut cluster = InMemoryCluster::with_bus(BridgeConfig::for_channel(""), bus);

    let result = cluster.add_node("x").await;

    assert!(matches!(result, Err(BridgeError::Config(_))));
}

#[tokio::test]
async fn test_publish_on_stopped_bridge_writes_nothing() {
    let cluster = cluster_of(&[("x", &["orders"])]).await;
    let x = cluster.node("x").unwrap();

    x.controller.publish_local_groups().await;
    assert!(cluster.store.keys(CHANNEL).is_empty());

    x.controller.start().await.unwrap();
    x.controller.stop().await;
    x.controller.publish_local_groups().await;

    assert!(cluster.store.keys(CHANNEL).is_empty());
}

fn announced_groups(store: &ReplicatedStore, node: &str) -> Option<BTreeSet<String>> {
    let bytes = store.entries(CHANNEL).get(node).cloned().flatten()?;
    Some(Announcement::decode(node, &bytes).unwrap().groups)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_group_churn_publishes_final_groups() {
    let cluster = cluster_of(&[("x", &[])]).await;
    cluster.start_all().await.unwrap();
    let x = cluster.node("x").unwrap();

    let mut tasks = Vec::new();
    for i in 0..40usize {
        let registry = Arc::clone(&x.registry);
        let controller = Arc::clone(&x.controller);
        tasks.push(tokio::spawn(async move {
            let group = format!("g{}", i % 5);
            registry.create_group(&group).await;
            controller.publish_local_groups().await;
            if i % 3 == 0 {
                registry.drop_group(&group).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let current = x.registry.current_group_names();
    let expected = (!current.is_empty()).then_some(current);
    assert_eq!(announced_groups(&cluster.store, "x"), expected);

    let mut tasks = Vec::new();
    for i in 0..5usize {
        let registry = Arc::clone(&x.registry);
        let controller = Arc::clone(&x.controller);
        tasks.push(tokio::spawn(async move {
            registry.drop_group(&format!("g{i}")).await;
            controller.publish_local_groups().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(x.registry.current_group_names().is_empty());
    assert_eq!(announced_groups(&cluster.store, "x"), None);
    assert!(!cluster.store.keys(CHANNEL).contains("x"));
}

// =============================================================================
// Interleavings
// =============================================================================

/// Store replica that can park the next `set` or `get_all` until released.
struct GatedStore {
    inner: Arc<StoreReplica>,
    hold_set: AtomicBool,
    hold_get_all: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: Arc<StoreReplica>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hold_set: AtomicBool::new(false),
            hold_get_all: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    async fn park_if(&self, hold: &AtomicBool) {
        if hold.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl AnnouncementStore for GatedStore {
    async fn set(&self, channel: &str, key: &str, value: Vec<u8>) -> Result<(), PortError> {
        self.park_if(&self.hold_set).await;
        self.inner.set(channel, key, value).await
    }

    async fn remove(&self, channel: &str, key: &str) -> Result<(), PortError> {
        self.inner.remove(channel, key).await
    }

    async fn get_all(
        &self,
        channel: &str,
    ) -> Result<BTreeMap<String, Option<Vec<u8>>>, PortError> {
        self.park_if(&self.hold_get_all).await;
        self.inner.get_all(channel).await
    }

    fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn AnnouncementListener>,
    ) -> Result<Subscription, PortError> {
        self.inner.subscribe(channel, listener)
    }
}

struct GatedNode {
    controller: Arc<BridgeController>,
    registry: Arc<InMemoryInvalidationRegistry>,
    store: Arc<ReplicatedStore>,
    gate: Arc<GatedStore>,
}

async fn gated_node(names: &[&str]) -> GatedNode {
    let membership = MembershipHub::new();
    let store = ReplicatedStore::new();
    let bus = InMemoryRpcBus::new();
    let gate = GatedStore::new(store.replica("x"));
    let registry = Arc::new(InMemoryInvalidationRegistry::new());
    for name in names {
        registry.create_group(name).await;
    }

    let controller = BridgeController::new(
        BridgeConfig::for_channel(CHANNEL),
        Collaborators {
            membership: membership.join("x").await,
            store: gate.clone(),
            rpc: bus.endpoint("x"),
            registry: registry.clone(),
        },
    )
    .unwrap();

    GatedNode {
        controller: Arc::new(controller),
        registry,
        store,
        gate,
    }
}

#[tokio::test]
async fn test_stop_waits_out_inflight_publish() {
    let node = gated_node(&["orders"]).await;
    node.controller.start().await.unwrap();
    node.gate.hold_set.store(true, Ordering::SeqCst);

    // A group-change publish parks inside the store write.
    let registry = Arc::clone(&node.registry);
    let create = tokio::spawn(async move { registry.create_group("users").await });
    node.gate.entered.notified().await;

    let controller = Arc::clone(&node.controller);
    let stop = tokio::spawn(async move { controller.stop().await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    node.gate.release.notify_one();
    create.await.unwrap();
    stop.await.unwrap();

    assert_eq!(node.controller.state(), BridgeState::Stopped);
    assert!(!node.store.keys(CHANNEL).contains("x"));

    // Nothing queued behind the stop writes either.
    node.registry.create_group("carts").await;
    node.controller.publish_local_groups().await;
    assert!(!node.store.keys(CHANNEL).contains("x"));
}

#[tokio::test]
async fn test_recompute_finishing_after_stop_is_discarded() {
    let node = gated_node(&["orders"]).await;
    let peer = Announcement::new(NodeId::new("y"), groups(&["users"]));
    node.store
        .put_raw(CHANNEL, "y", Some(peer.encode().unwrap()))
        .await;
    node.controller.start().await.unwrap();
    let started = node.controller.bridged_groups().generation();
    assert!(node.controller.bridged_groups().contains("users"));

    // The read sees the peer but returns only after the stop cleared everything.
    node.gate.hold_get_all.store(true, Ordering::SeqCst);
    let controller = Arc::clone(&node.controller);
    let recompute =
        tokio::spawn(async move { controller.on_announcement_store_changed().await });
    node.gate.entered.notified().await;

    node.controller.stop().await;
    let cleared = node.controller.bridged_groups();
    assert!(cleared.is_empty());
    assert!(cleared.generation() > started + 1);

    node.gate.release.notify_one();
    recompute.await.unwrap();

    let after = node.controller.bridged_groups();
    assert!(after.is_empty());
    assert_eq!(after.generation(), cleared.generation());
    assert_eq!(node.controller.state(), BridgeState::Stopped);
}
