//! What every bridged client needs to reach the rest of the fleet.

use std::sync::Arc;

use livebase_core::types::ChannelId;

use crate::metrics::RealtimeMetrics;
use crate::rules::IdentityRehydrator;

use super::transport::BridgeTransport;

/// This instance's identity plus the shared transport and rehydrator.
#[derive(Debug, Clone)]
pub struct BridgeLink {
    channel_id: ChannelId,
    transport: Arc<dyn BridgeTransport>,
    rehydrator: Arc<dyn IdentityRehydrator>,
    metrics: Arc<RealtimeMetrics>,
}

impl BridgeLink {
    /// Create a link for a freshly started instance.
    pub fn new(
        channel_id: ChannelId,
        transport: Arc<dyn BridgeTransport>,
        rehydrator: Arc<dyn IdentityRehydrator>,
        metrics: Arc<RealtimeMetrics>,
    ) -> Self {
        Self {
            channel_id,
            transport,
            rehydrator,
            metrics,
        }
    }

    /// This instance's channel id.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<dyn BridgeTransport> {
        &self.transport
    }

    /// The identity rehydrator.
    pub fn rehydrator(&self) -> &Arc<dyn IdentityRehydrator> {
        &self.rehydrator
    }

    /// Engine metrics.
    pub fn metrics(&self) -> &Arc<RealtimeMetrics> {
        &self.metrics
    }
}
