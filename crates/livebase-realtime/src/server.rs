//! Top-level realtime engine that ties together all subsystems.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use livebase_core::config::RealtimeConfig;
use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::record::{CollectionRegistry, Record};

use crate::bridge::heartbeat::HeartbeatSettings;
use crate::bridge::{
    BridgeLink, BridgeTransport, BridgedClient, MemoryBridgeTransport, RealtimeBridge,
};
use crate::broadcast::{DryCache, RecordChangeBroadcaster};
use crate::connection::client::ClientState;
use crate::connection::options::parse_subscriptions;
use crate::connection::{Broker, ClientEvent, ClientSession, SessionEnd};
use crate::message::Message;
use crate::metrics::{MetricsSnapshot, RealtimeMetrics};
use crate::rules::{
    BasicRuleEvaluator, IdentityRehydrator, NoopExpander, RecordExpander, RuleEvaluator,
};

/// Buffer of the client lifecycle event channel.
const EVENT_BUFFER: usize = 256;

/// Central realtime engine: owns the broker, the bridge and the
/// broadcaster, and is the only surface the HTTP layer and the write path
/// talk to.
#[derive(Clone)]
pub struct RealtimeEngine {
    /// Directory of local clients and remote mirrors.
    pub broker: Arc<Broker>,
    /// Cross-instance bridge.
    pub bridge: Arc<RealtimeBridge>,
    /// Record change fan-out.
    pub broadcaster: Arc<RecordChangeBroadcaster>,
    /// Metrics collector.
    pub metrics: Arc<RealtimeMetrics>,
    /// Known collections.
    pub collections: Arc<CollectionRegistry>,
    config: RealtimeConfig,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("channel_id", &self.channel_id())
            .finish()
    }
}

/// Point-in-time view of the engine for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// This instance's channel id.
    pub channel_id: ChannelId,
    /// Clients known here, mirrors included.
    pub total_clients: usize,
    /// Clients connected to this instance.
    pub local_clients: usize,
    /// Instances holding a live lease.
    pub live_channels: u64,
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
}

/// Builder for [`RealtimeEngine`].
pub struct RealtimeEngineBuilder {
    config: RealtimeConfig,
    transport: Arc<dyn BridgeTransport>,
    collections: Arc<CollectionRegistry>,
    rules: Option<Arc<dyn RuleEvaluator>>,
    expander: Option<Arc<dyn RecordExpander>>,
}

impl RealtimeEngineBuilder {
    /// Use a custom rule evaluator instead of [`BasicRuleEvaluator`].
    pub fn rules(mut self, rules: Arc<dyn RuleEvaluator>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Use a relation expander instead of [`NoopExpander`].
    pub fn expander(mut self, expander: Arc<dyn RecordExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Assemble the engine under a freshly minted channel id.
    pub fn build(self) -> RealtimeEngine {
        let channel_id = ChannelId::new();
        let metrics = Arc::new(RealtimeMetrics::new());
        let broker = Arc::new(Broker::new());

        let rehydrator: Arc<dyn IdentityRehydrator> = self.collections.clone();
        let link = BridgeLink::new(channel_id, self.transport, rehydrator, Arc::clone(&metrics));
        let bridge = Arc::new(RealtimeBridge::new(
            link,
            Arc::clone(&broker),
            HeartbeatSettings::from_config(&self.config),
        ));

        let broadcaster = Arc::new(RecordChangeBroadcaster::new(
            Arc::clone(&broker),
            self.rules.unwrap_or_else(|| Arc::new(BasicRuleEvaluator)),
            self.expander.unwrap_or_else(|| Arc::new(NoopExpander)),
            DryCache::new(self.config.dry_cache_capacity, self.config.dry_cache_ttl()),
            Arc::clone(&metrics),
        ));

        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        info!(channel_id = %channel_id, "Realtime engine initialized");

        RealtimeEngine {
            broker,
            bridge,
            broadcaster,
            metrics,
            collections: self.collections,
            config: self.config,
            events_tx,
        }
    }
}

impl RealtimeEngine {
    /// Start building an engine over `transport`.
    pub fn builder(
        config: RealtimeConfig,
        transport: Arc<dyn BridgeTransport>,
        collections: Arc<CollectionRegistry>,
    ) -> RealtimeEngineBuilder {
        RealtimeEngineBuilder {
            config,
            transport,
            collections,
            rules: None,
            expander: None,
        }
    }

    /// A stand-alone engine on a private in-process bridge.
    pub fn in_memory(config: RealtimeConfig, collections: Arc<CollectionRegistry>) -> Self {
        Self::builder(
            config,
            Arc::new(MemoryBridgeTransport::standalone()),
            collections,
        )
        .build()
    }

    /// This instance's channel id.
    pub fn channel_id(&self) -> ChannelId {
        self.bridge.channel_id()
    }

    /// Engine configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Claim the lease and start the bridge tasks.
    pub async fn start(&self) -> AppResult<()> {
        self.bridge.start().await
    }

    /// Disconnect local clients and leave the fleet.
    pub async fn shutdown(&self) -> AppResult<()> {
        info!(channel_id = %self.channel_id(), "Shutting down realtime engine");
        self.bridge.shutdown().await
    }

    /// Subscribe to client lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    /// Accept a connection: register a new local client and queue its
    /// connect message. The returned session must be driven with
    /// [`RealtimeEngine::serve`]. Refused once shutdown has begun.
    pub async fn connect(&self) -> AppResult<ClientSession> {
        if self.bridge.is_stopping() {
            return Err(AppError::service_unavailable("Realtime engine is shutting down"));
        }

        let (client, mailbox) =
            BridgedClient::new_local(self.bridge.link().clone(), self.config.mailbox_size);
        let client = Arc::new(client);
        let client_id = client.id();

        if let Some(replaced) = self.broker.register(Arc::clone(&client)) {
            replaced.discard();
        }
        // Shutdown may have collected the local clients while this one was
        // being registered.
        if self.bridge.is_stopping() {
            client.discard();
            self.broker.unregister(client_id);
            return Err(AppError::service_unavailable("Realtime engine is shutting down"));
        }
        self.metrics.connection_opened();

        if let Err(e) = client.broadcast_changes().await {
            warn!(client_id = %client_id, error = %e, "Failed to announce new client");
        }

        client.send(Message::connect(client_id)?);
        let _ = self.events_tx.send(ClientEvent::Connected { client_id });

        debug!(client_id = %client_id, "Client connected");
        Ok(ClientSession::new(client, mailbox, self.config.idle_timeout()))
    }

    /// Drive `session` until it ends, then unregister the client and tell
    /// the fleet it is gone.
    pub async fn serve(&self, session: ClientSession, outbound: mpsc::Sender<Message>) -> SessionEnd {
        let client = Arc::clone(session.client());
        let client_id = client.id();

        let reason = session.run(outbound).await;

        client.discard();
        // Only drop the entry if it is still ours; an eviction may already
        // have removed it.
        if self
            .broker
            .client_by_id(client_id)
            .is_some_and(|current| Arc::ptr_eq(&current, &client))
        {
            self.broker.unregister(client_id);
        }
        if let Err(e) = client.broadcast_go_offline().await {
            warn!(client_id = %client_id, error = %e, "Failed to withdraw disconnected client");
        }

        self.metrics.connection_closed();
        let _ = self
            .events_tx
            .send(ClientEvent::Disconnected { client_id, reason });

        info!(client_id = %client_id, reason = %reason, "Client disconnected");
        reason
    }

    /// Replace a client's subscriptions.
    ///
    /// `caller` is the identity of the request. It is bound to the client
    /// when none is bound yet; a client already bound to another identity
    /// (or a guest caller on a bound client) is rejected.
    pub async fn set_subscriptions(
        &self,
        client_id: ClientId,
        caller: Option<Arc<Record>>,
        subscriptions: &[String],
    ) -> AppResult<()> {
        if subscriptions.len() > self.config.max_subscriptions_per_client {
            return Err(AppError::validation(format!(
                "At most {} subscriptions are allowed",
                self.config.max_subscriptions_per_client
            )));
        }
        if let Some(long) = subscriptions
            .iter()
            .find(|s| s.chars().count() > self.config.max_topic_length)
        {
            return Err(AppError::validation(format!(
                "Subscription '{}...' exceeds {} characters",
                long.chars().take(32).collect::<String>(),
                self.config.max_topic_length
            )));
        }
        // Topics become SSE event names, which cannot span lines.
        if subscriptions.iter().any(|s| s.chars().any(char::is_control)) {
            return Err(AppError::validation(
                "Subscriptions must not contain control characters",
            ));
        }

        let client = self
            .broker
            .client_by_id(client_id)
            .filter(|client| !client.is_discarded())
            .ok_or_else(|| AppError::not_found(format!("Client {client_id} not found")))?;

        let bound = client.client().auth().await;
        let auth = match (bound, caller) {
            (Some(bound), Some(caller)) if bound.same_identity(&caller) => Some(caller),
            (Some(_), _) => {
                return Err(AppError::authorization(
                    "The current identity differs from the one bound to this client",
                ));
            }
            (None, caller) => caller,
        };

        let parsed = parse_subscriptions(subscriptions)?;

        client
            .client()
            .replace_state(ClientState {
                subscriptions: parsed,
                auth,
            })
            .await;

        if let Err(e) = client.broadcast_changes().await {
            warn!(client_id = %client_id, error = %e, "Failed to announce subscription change");
        }

        debug!(
            client_id = %client_id,
            subscriptions = subscriptions.len(),
            "Subscriptions replaced"
        );
        Ok(())
    }

    /// Hook: a record was created.
    pub async fn after_create(&self, record: &Record) -> usize {
        self.broadcaster.after_create(record).await
    }

    /// Hook: a record was updated. Clients bound to an updated identity get
    /// the fresh record before anything is evaluated.
    pub async fn after_update(&self, record: &Record) -> usize {
        if record.collection().is_auth() {
            self.refresh_identity(record).await;
        }
        self.broadcaster.after_update(record).await
    }

    /// Hook: a record is about to be deleted.
    pub async fn before_delete(&self, record: &Record) -> usize {
        self.broadcaster.before_delete(record).await
    }

    /// Hook: a delete committed. Clients bound to a deleted identity become
    /// guests.
    pub async fn after_delete(&self, record: &Record) -> usize {
        let sent = self.broadcaster.after_delete(record).await;
        if record.collection().is_auth() {
            self.drop_identity(record).await;
        }
        sent
    }

    /// Hook: a delete rolled back.
    pub async fn delete_aborted(&self, record: &Record) {
        self.broadcaster.delete_aborted(record).await;
    }

    /// Counters and directory sizes.
    pub async fn status(&self) -> AppResult<EngineStatus> {
        Ok(EngineStatus {
            channel_id: self.channel_id(),
            total_clients: self.broker.total_clients(),
            local_clients: self.broker.total_local_clients(),
            live_channels: self.bridge.transport().live_channels().await?,
            metrics: self.metrics.snapshot(),
        })
    }

    async fn refresh_identity(&self, record: &Record) {
        let fresh = Arc::new(record.clean_copy());
        for client in self.bound_to(record).await {
            client.client().set_auth(Some(Arc::clone(&fresh))).await;
            if let Err(e) = client.broadcast_changes().await {
                warn!(client_id = %client.id(), error = %e, "Failed to announce refreshed identity");
            }
        }
    }

    async fn drop_identity(&self, record: &Record) {
        for client in self.bound_to(record).await {
            client.client().set_auth(None).await;
            if let Err(e) = client.broadcast_changes().await {
                warn!(client_id = %client.id(), error = %e, "Failed to announce dropped identity");
            }
        }
    }

    async fn bound_to(&self, record: &Record) -> Vec<Arc<BridgedClient>> {
        let mut bound = Vec::new();
        for client in self.broker.clients() {
            if client.is_discarded() {
                continue;
            }
            if client
                .client()
                .auth()
                .await
                .is_some_and(|auth| auth.same_identity(record))
            {
                bound.push(client);
            }
        }
        bound
    }
}
