//! In-process transport.
//!
//! A [`MemoryBridgeHub`] plays the shared store: several engines holding
//! transports from the same hub behave like instances sharing one
//! database. Single-node deployments use a private hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::subscription::ClientSubscription;

use crate::message::Message;

use super::envelope::BridgeEnvelope;
use super::transport::{BridgeTransport, EnvelopeStream, EvictedClient};

const HUB_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct HubState {
    rows: HashMap<ClientId, ClientSubscription>,
    leases: HashMap<ChannelId, Instant>,
}

impl HubState {
    fn is_live(&self, channel_id: ChannelId, now: Instant) -> bool {
        self.leases
            .get(&channel_id)
            .is_some_and(|valid_until| *valid_until > now)
    }
}

/// Shared state and notification fan-out for in-process transports.
#[derive(Debug)]
pub struct MemoryBridgeHub {
    state: Mutex<HubState>,
    events: broadcast::Sender<BridgeEnvelope>,
}

impl MemoryBridgeHub {
    /// Create an empty hub.
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(HUB_BUFFER);
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            events,
        })
    }

    /// A transport attached to this hub.
    pub fn transport(self: &Arc<Self>) -> MemoryBridgeTransport {
        MemoryBridgeTransport {
            hub: Arc::clone(self),
        }
    }

    /// Force a channel's lease into the past, as if its instance had
    /// stopped renewing it.
    pub async fn expire_lease(&self, channel_id: ChannelId) {
        let mut state = self.state.lock().await;
        if let Some(valid_until) = state.leases.get_mut(&channel_id) {
            *valid_until = Instant::now();
        }
    }

    /// The stored row of one client.
    pub async fn row(&self, client_id: ClientId) -> Option<ClientSubscription> {
        self.state.lock().await.rows.get(&client_id).cloned()
    }

    /// Number of stored rows.
    pub async fn row_count(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    fn publish(&self, envelope: BridgeEnvelope) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(envelope);
    }
}

/// Transport handle onto a [`MemoryBridgeHub`].
#[derive(Debug, Clone)]
pub struct MemoryBridgeTransport {
    hub: Arc<MemoryBridgeHub>,
}

impl MemoryBridgeTransport {
    /// Transport on a private hub.
    pub fn standalone() -> Self {
        MemoryBridgeHub::new().transport()
    }

    /// The hub behind this transport.
    pub fn hub(&self) -> &Arc<MemoryBridgeHub> {
        &self.hub
    }
}

#[async_trait]
impl BridgeTransport for MemoryBridgeTransport {
    async fn listen(&self) -> AppResult<EnvelopeStream> {
        let stream = BroadcastStream::new(self.hub.events.subscribe()).map(|item| match item {
            Ok(envelope) => Ok(envelope),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Err(AppError::service_unavailable(
                format!("Bridge listener lagged, {skipped} notifications lost"),
            )),
        });
        Ok(stream.boxed())
    }

    async fn publish_upsert(&self, row: &ClientSubscription) -> AppResult<()> {
        row.validate()?;
        let mut state = self.hub.state.lock().await;
        state.rows.insert(row.client_id, row.clone());
        self.hub.publish(BridgeEnvelope::upsert(row));
        Ok(())
    }

    async fn publish_delete(&self, client_id: ClientId, updated_by: ChannelId) -> AppResult<bool> {
        let mut state = self.hub.state.lock().await;
        let existed = state.rows.remove(&client_id).is_some();
        self.hub.publish(BridgeEnvelope::SubscriptionDelete {
            client_id,
            updated_by,
        });
        Ok(existed)
    }

    async fn deliver(
        &self,
        target: ChannelId,
        client_id: ClientId,
        message: &Message,
    ) -> AppResult<()> {
        self.hub
            .publish(BridgeEnvelope::deliver(target, client_id, message));
        Ok(())
    }

    async fn find_subscription(&self, client_id: ClientId) -> AppResult<Option<ClientSubscription>> {
        Ok(self.hub.row(client_id).await)
    }

    async fn foreign_subscriptions(
        &self,
        channel_id: ChannelId,
    ) -> AppResult<Vec<ClientSubscription>> {
        let state = self.hub.state.lock().await;
        let now = Instant::now();
        Ok(state
            .rows
            .values()
            .filter(|row| row.channel_id != channel_id && state.is_live(row.channel_id, now))
            .cloned()
            .collect())
    }

    async fn renew_lease(&self, channel_id: ChannelId, lease: Duration) -> AppResult<bool> {
        let mut state = self.hub.state.lock().await;
        let previous = state.leases.insert(channel_id, Instant::now() + lease);
        Ok(previous.is_none())
    }

    async fn sweep_expired(&self, swept_by: ChannelId) -> AppResult<Vec<EvictedClient>> {
        let mut state = self.hub.state.lock().await;
        let now = Instant::now();

        let mut dead: Vec<ChannelId> = state
            .leases
            .iter()
            .filter(|(channel_id, valid_until)| **channel_id != swept_by && **valid_until <= now)
            .map(|(channel_id, _)| *channel_id)
            .collect();
        for row in state.rows.values() {
            if row.channel_id != swept_by
                && !state.leases.contains_key(&row.channel_id)
                && !dead.contains(&row.channel_id)
            {
                dead.push(row.channel_id);
            }
        }

        let mut evicted = Vec::new();
        for channel_id in dead {
            let client_ids: Vec<ClientId> = state
                .rows
                .values()
                .filter(|row| row.channel_id == channel_id)
                .map(|row| row.client_id)
                .collect();
            for client_id in client_ids {
                state.rows.remove(&client_id);
                self.hub.publish(BridgeEnvelope::SubscriptionEvict {
                    client_id,
                    channel_id,
                    swept_by,
                });
                evicted.push(EvictedClient {
                    channel_id,
                    client_id,
                });
            }
            state.leases.remove(&channel_id);
        }
        Ok(evicted)
    }

    async fn release_lease(&self, channel_id: ChannelId) -> AppResult<()> {
        self.hub.state.lock().await.leases.remove(&channel_id);
        Ok(())
    }

    // Payloads are never too large here, so nothing is ever spooled.
    async fn take_spooled(
        &self,
        _spool_id: Uuid,
        _target: ChannelId,
    ) -> AppResult<Option<BridgeEnvelope>> {
        Ok(None)
    }

    async fn purge_spool(&self, _age: Duration) -> AppResult<u64> {
        Ok(0)
    }

    async fn live_channels(&self) -> AppResult<u64> {
        let state = self.hub.state.lock().await;
        let now = Instant::now();
        Ok(state.leases.values().filter(|valid_until| **valid_until > now).count() as u64)
    }
}
