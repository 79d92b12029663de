//! In-memory RPC broadcast substrate.
//!
//! Handlers are keyed by `(channel, node)`. A broadcast from one node reaches
//! every other node with a handler on the channel. Sync delivery awaits each
//! target under the bus timeout; async delivery is spawned and can be
//! awaited with [`InMemoryRpcBus::flush`].

use crate::domain::{DeliveryMode, InvalidationEvent, NodeId, PortError};
use crate::ports::{RemoteInvalidationHandler, RpcBroadcast};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Default bound on a sync delivery.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A broadcast as issued by a node.
#[derive(Clone, Debug)]
pub struct SentCall {
    /// Sending node.
    pub from: NodeId,
    /// Channel the call was made on.
    pub channel: String,
    /// Payload.
    pub event: InvalidationEvent,
    /// Requested delivery mode.
    pub mode: DeliveryMode,
    /// Nodes the call was addressed to.
    pub targets: Vec<NodeId>,
}

/// Shared RPC bus for one partition.
///
/// Every broadcast is recorded for inspection and the log grows for the
/// bus's lifetime. Finished async deliveries are reaped on the next
/// broadcast or by [`InMemoryRpcBus::flush`].
pub struct InMemoryRpcBus {
    handlers: RwLock<BTreeMap<(String, NodeId), Arc<dyn RemoteInvalidationHandler>>>,
    unreachable: RwLock<BTreeSet<NodeId>>,
    delays: RwLock<BTreeMap<NodeId, Duration>>,
    sent: Mutex<Vec<SentCall>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    timeout: Duration,
}

impl InMemoryRpcBus {
    /// Bus with [`DEFAULT_CALL_TIMEOUT`].
    pub fn new() -> Arc<Self> {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    /// Bus with a custom sync delivery timeout.
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(BTreeMap::new()),
            unreachable: RwLock::new(BTreeSet::new()),
            delays: RwLock::new(BTreeMap::new()),
            sent: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            timeout,
        })
    }

    /// Endpoint `node` uses to register and broadcast.
    pub fn endpoint(self: &Arc<Self>, node: impl Into<NodeId>) -> Arc<RpcEndpoint> {
        Arc::new(RpcEndpoint {
            bus: Arc::clone(self),
            node: node.into(),
        })
    }

    /// Make deliveries to `node` fail.
    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        let mut set = self.unreachable.write();
        if unreachable {
            set.insert(node.clone());
        } else {
            set.remove(node);
        }
    }

    /// Delay every delivery to `node`.
    pub fn set_delay(&self, node: &NodeId, delay: Duration) {
        self.delays.write().insert(node.clone(), delay);
    }

    /// Whether `node` has a handler on `channel`.
    pub fn is_registered(&self, channel: &str, node: &NodeId) -> bool {
        self.handlers
            .read()
            .contains_key(&(channel.to_string(), node.clone()))
    }

    /// Every broadcast issued so far, oldest first.
    pub fn sent(&self) -> Vec<SentCall> {
        self.sent.lock().clone()
    }

    /// Broadcasts issued by `node`.
    pub fn sent_by(&self, node: &NodeId) -> Vec<SentCall> {
        self.sent
            .lock()
            .iter()
            .filter(|call| &call.from == node)
            .cloned()
            .collect()
    }

    /// Async deliveries spawned and not yet reaped.
    pub fn pending_deliveries(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait for every spawned async delivery to finish.
    pub async fn flush(&self) {
        loop {
            let pending = std::mem::take(&mut *self.pending.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    debug!(error = %e, "[rpc] Async delivery task failed");
                }
            }
        }
    }

    fn targets(&self, channel: &str, from: &NodeId) -> Vec<(NodeId, Arc<dyn RemoteInvalidationHandler>)> {
        self.handlers
            .read()
            .iter()
            .filter(|((ch, node), _)| ch == channel && node != from)
            .map(|((_, node), handler)| (node.clone(), Arc::clone(handler)))
            .collect()
    }

    fn delivery(
        &self,
        target: &NodeId,
        handler: Arc<dyn RemoteInvalidationHandler>,
        event: InvalidationEvent,
    ) -> Result<impl std::future::Future<Output = ()> + Send + 'static, PortError> {
        if self.unreachable.read().contains(target) {
            return Err(PortError::Unreachable(target.to_string()));
        }
        let delay = self.delays.read().get(target).copied();
        Ok(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            handler.dispatch(event).await;
        })
    }
}

/// One node's handle on an [`InMemoryRpcBus`].
pub struct RpcEndpoint {
    bus: Arc<InMemoryRpcBus>,
    node: NodeId,
}

impl RpcEndpoint {
    /// The shared bus.
    pub fn bus(&self) -> &Arc<InMemoryRpcBus> {
        &self.bus
    }
}

#[async_trait]
impl RpcBroadcast for RpcEndpoint {
    fn register_handler(
        &self,
        channel: &str,
        handler: Arc<dyn RemoteInvalidationHandler>,
    ) -> Result<(), PortError> {
        let mut handlers = self.bus.handlers.write();
        let key = (channel.to_string(), self.node.clone());
        if handlers.contains_key(&key) {
            return Err(PortError::NameCollision(channel.to_string()));
        }
        handlers.insert(key, handler);
        Ok(())
    }

    fn unregister_handler(&self, channel: &str) -> Result<(), PortError> {
        self.bus
            .handlers
            .write()
            .remove(&(channel.to_string(), self.node.clone()))
            .map(|_| ())
            .ok_or_else(|| PortError::NotRegistered(channel.to_string()))
    }

    async fn broadcast(
        &self,
        channel: &str,
        event: InvalidationEvent,
        mode: DeliveryMode,
    ) -> Result<(), PortError> {
        let targets = self.bus.targets(channel, &self.node);
        self.bus.sent.lock().push(SentCall {
            from: self.node.clone(),
            channel: channel.to_string(),
            event: event.clone(),
            mode,
            targets: targets.iter().map(|(node, _)| node.clone()).collect(),
        });
        trace!(from = %self.node, channel, targets = targets.len(), ?mode, "[rpc] broadcast");

        let mut first_error = None;
        for (target, handler) in targets {
            let delivery = match self.bus.delivery(&target, handler, event.clone()) {
                Ok(delivery) => delivery,
                Err(e) => {
                    debug!(from = %self.node, %target, "[rpc] Target unreachable");
                    first_error = first_error.or(Some(e));
                    continue;
                }
            };

            match mode {
                DeliveryMode::Sync => {
                    if tokio::time::timeout(self.bus.timeout, delivery).await.is_err() {
                        debug!(from = %self.node, %target, "[rpc] Delivery timed out");
                        first_error = first_error.or(Some(PortError::Timeout(self.bus.timeout)));
                    }
                }
                DeliveryMode::Async => {
                    let handle = tokio::spawn(delivery);
                    let mut pending = self.bus.pending.lock();
                    pending.retain(|h| !h.is_finished());
                    pending.push(handle);
                }
            }
        }

        match (mode, first_error) {
            (DeliveryMode::Sync, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}
