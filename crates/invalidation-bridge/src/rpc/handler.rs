//! Remote invalidation entry points.
//!
//! Registered with the RPC substrate under the bridge channel; every call is
//! handed to the relay, which applies it locally and never re-broadcasts.

use crate::domain::{BatchEntry, CacheKey, InvalidationEvent};
use crate::ports::RemoteInvalidationHandler;
use crate::service::InvalidationRelay;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Adapter registered with the RPC substrate under the bridge channel.
///
/// Each entry point forwards verbatim to
/// [`InvalidationRelay::on_remote_invalidate`].
pub struct RpcHandlerSurface {
    relay: Arc<InvalidationRelay>,
}

impl RpcHandlerSurface {
    /// Wrap a relay.
    pub fn new(relay: Arc<InvalidationRelay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl RemoteInvalidationHandler for RpcHandlerSurface {
    async fn invalidate_one(&self, group: String, key: CacheKey) {
        trace!(%group, %key, "[bridge] rpc invalidate_one");
        self.relay
            .on_remote_invalidate(InvalidationEvent::Single { group, key })
            .await;
    }

    async fn invalidate_many(&self, group: String, keys: Vec<CacheKey>) {
        trace!(%group, keys = keys.len(), "[bridge] rpc invalidate_many");
        self.relay
            .on_remote_invalidate(InvalidationEvent::Many { group, keys })
            .await;
    }

    async fn invalidate_batch(&self, entries: Vec<BatchEntry>) {
        trace!(entries = entries.len(), "[bridge] rpc invalidate_batch");
        self.relay
            .on_remote_invalidate(InvalidationEvent::Batch { entries })
            .await;
    }
}
