//! Instance-side half of the bridge: listener, bootstrap, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::subscription::ClientSubscription;

use crate::connection::broker::Broker;
use crate::message::Message;

use super::client::BridgedClient;
use super::envelope::BridgeEnvelope;
use super::heartbeat::{HeartbeatSettings, run_heartbeat};
use super::link::BridgeLink;
use super::transport::{BridgeTransport, EnvelopeStream};

/// Pause after a listener error before polling again.
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Owns this instance's channel id and the two background tasks that keep
/// the local [`Broker`] in sync with the fleet.
#[derive(Debug)]
pub struct RealtimeBridge {
    link: BridgeLink,
    broker: Arc<Broker>,
    heartbeat: HeartbeatSettings,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeBridge {
    /// Create a bridge. Nothing runs until [`RealtimeBridge::start`].
    pub fn new(link: BridgeLink, broker: Arc<Broker>, heartbeat: HeartbeatSettings) -> Self {
        Self {
            link,
            broker,
            heartbeat,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// This instance's channel id.
    pub fn channel_id(&self) -> ChannelId {
        self.link.channel_id()
    }

    /// Link handed to every client created on this instance.
    pub fn link(&self) -> &BridgeLink {
        &self.link
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<dyn BridgeTransport> {
        self.link.transport()
    }

    /// Claim the lease, start listening, mirror clients that connected to
    /// siblings earlier, then start the heartbeat.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        let channel_id = self.channel_id();
        self.transport()
            .renew_lease(channel_id, self.heartbeat.lease)
            .await?;

        let stream = self.transport().listen().await?;
        let listener = tokio::spawn(Arc::clone(self).run_listener(stream));
        self.tasks.lock().await.push(listener);

        let mirrored = self.bootstrap().await?;

        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(self),
            self.heartbeat,
            self.cancel.clone(),
        ));
        self.tasks.lock().await.push(heartbeat);

        info!(channel_id = %channel_id, mirrored, "Realtime bridge started");
        Ok(())
    }

    /// Register a mirror for every client held by another live instance.
    pub async fn bootstrap(&self) -> AppResult<usize> {
        let rows = self
            .transport()
            .foreign_subscriptions(self.channel_id())
            .await?;

        let mut mirrored = 0;
        for row in rows {
            if self.broker.client_by_id(row.client_id).is_some() {
                continue;
            }
            if self.mirror(&row).await.is_some() {
                mirrored += 1;
            }
        }
        Ok(mirrored)
    }

    /// Apply one notification. Safe to call with duplicates, stale or
    /// out-of-order envelopes, and this instance's own echoes.
    pub async fn apply(&self, envelope: BridgeEnvelope) {
        let self_id = self.channel_id();
        match envelope {
            BridgeEnvelope::SubscriptionUpsert {
                client_id,
                updated_by,
                subscription,
                ..
            } => {
                if updated_by == self_id {
                    return;
                }
                let row = match subscription {
                    Some(row) => Some(row),
                    None => match self.transport().find_subscription(client_id).await {
                        Ok(row) => row,
                        Err(e) => {
                            warn!(client_id = %client_id, error = %e, "Failed to load announced subscription");
                            return;
                        }
                    },
                };
                if let Some(row) = row {
                    self.apply_upsert(row).await;
                }
            }
            BridgeEnvelope::SubscriptionDelete {
                client_id,
                updated_by,
            } => {
                if updated_by == self_id {
                    return;
                }
                self.apply_delete(client_id).await;
            }
            BridgeEnvelope::SubscriptionEvict {
                client_id,
                channel_id,
                swept_by,
            } => {
                if let Some(client) = self.broker.unregister(client_id) {
                    client.discard();
                    self.link.metrics().clients_evicted(1);
                    info!(
                        client_id = %client_id,
                        channel_id = %channel_id,
                        swept_by = %swept_by,
                        "Evicted client of expired channel"
                    );
                }
            }
            BridgeEnvelope::MessageDeliver {
                target_channel,
                client_id,
                topic,
                data,
            } => {
                if target_channel == self_id {
                    self.deliver_local(client_id, Message::new(topic, data));
                }
            }
            BridgeEnvelope::MessageSpooled {
                target_channel,
                spool_id,
            } => {
                if target_channel != self_id {
                    return;
                }
                match self.transport().take_spooled(spool_id, self_id).await {
                    Ok(Some(BridgeEnvelope::MessageDeliver {
                        client_id,
                        topic,
                        data,
                        ..
                    })) => self.deliver_local(client_id, Message::new(topic, data)),
                    Ok(Some(other)) => {
                        warn!(kind = other.kind(), "Unexpected envelope in message spool");
                    }
                    Ok(None) => debug!(spool_id = %spool_id, "Spooled message already taken"),
                    Err(e) => warn!(spool_id = %spool_id, error = %e, "Failed to take spooled message"),
                }
            }
        }
    }

    /// Whether [`RealtimeBridge::shutdown`] has begun.
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Discard local clients, withdraw their rows, stop the background
    /// tasks, and release the lease.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bridge task ended abnormally");
            }
        }

        let local = self.broker.local_clients();
        for client in &local {
            client.discard();
            self.broker.unregister(client.id());
            if let Err(e) = client.broadcast_go_offline().await {
                warn!(client_id = %client.id(), error = %e, "Failed to withdraw client on shutdown");
            }
        }

        self.transport().release_lease(self.channel_id()).await?;
        info!(
            channel_id = %self.channel_id(),
            clients = local.len(),
            "Realtime bridge stopped"
        );
        Ok(())
    }

    async fn run_listener(self: Arc<Self>, mut stream: EnvelopeStream) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(envelope)) => {
                        self.link.metrics().notification_received();
                        debug!(kind = envelope.kind(), "Bridge notification");
                        self.apply(envelope).await;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Bridge listener error");
                        tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                    }
                    None => {
                        error!("Bridge notification stream ended");
                        break;
                    }
                },
            }
        }
        debug!(channel_id = %self.channel_id(), "Bridge listener stopped");
    }

    async fn apply_upsert(&self, row: ClientSubscription) {
        let existing = self.broker.client_by_id(row.client_id);

        if row.channel_id == self.channel_id() {
            // A sibling changed one of our own clients.
            match existing {
                Some(client) if !client.is_remote() => {
                    if let Err(e) = client.receive_changes(&row).await {
                        error!(client_id = %row.client_id, error = %e, "Failed to apply sibling change to local client");
                    }
                }
                _ => {
                    debug!(client_id = %row.client_id, "Withdrawing row of a client no longer connected here");
                    if let Err(e) = self
                        .transport()
                        .publish_delete(row.client_id, self.channel_id())
                        .await
                    {
                        warn!(client_id = %row.client_id, error = %e, "Failed to withdraw stale row");
                    }
                }
            }
            return;
        }

        match existing {
            Some(client) if !client.is_remote() => {
                warn!(
                    client_id = %row.client_id,
                    channel_id = %row.channel_id,
                    "Sibling claims a client connected here, ignoring"
                );
            }
            Some(client) if client.channel_id() == row.channel_id => {
                if let Err(e) = client.receive_changes(&row).await {
                    error!(
                        client_id = %row.client_id,
                        error = %e,
                        "Dropping remote client whose identity cannot be rehydrated"
                    );
                    client.discard();
                    self.broker.unregister(row.client_id);
                }
            }
            _ => {
                self.mirror(&row).await;
            }
        }
    }

    async fn apply_delete(&self, client_id: ClientId) {
        let Some(client) = self.broker.client_by_id(client_id) else {
            return;
        };
        if client.is_remote() {
            client.discard();
            self.broker.unregister(client_id);
            debug!(client_id = %client_id, "Remote client went offline");
        } else {
            // A sibling emptied the subscription set; the connection stays.
            client.client().unsubscribe(&[]).await;
            debug!(client_id = %client_id, "Local client subscriptions cleared by sibling");
        }
    }

    async fn mirror(&self, row: &ClientSubscription) -> Option<Arc<BridgedClient>> {
        let client = Arc::new(BridgedClient::new_remote(self.link.clone(), row));
        if let Err(e) = client.receive_changes(row).await {
            error!(
                client_id = %row.client_id,
                channel_id = %row.channel_id,
                error = %e,
                "Refusing to mirror client whose identity cannot be rehydrated"
            );
            if let Some(stale) = self.broker.unregister(row.client_id) {
                stale.discard();
            }
            return None;
        }
        if let Some(replaced) = self.broker.register(Arc::clone(&client)) {
            replaced.discard();
        }
        Some(client)
    }

    fn deliver_local(&self, client_id: ClientId, message: Message) {
        match self.broker.client_by_id(client_id) {
            Some(client) if !client.is_remote() => client.send(message),
            _ => debug!(client_id = %client_id, "Bridged message for unknown client dropped"),
        }
    }

    pub(crate) fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub(crate) fn heartbeat_settings(&self) -> HeartbeatSettings {
        self.heartbeat
    }
}
