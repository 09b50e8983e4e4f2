//! Shared helpers for multi-instance bridge tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use livebase_core::config::RealtimeConfig;
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::record::{Collection, CollectionKind, CollectionRegistry, Record};
use livebase_entity::subscription::ClientSubscription;
use livebase_realtime::bridge::transport::EnvelopeStream;
use livebase_realtime::{
    BridgeEnvelope, BridgeTransport, EvictedClient, MemoryBridgeHub, MemoryBridgeTransport,
    Message, RealtimeEngine, SessionEnd,
};

/// How long a test waits for a notification to cross the hub.
pub const PROPAGATION: Duration = Duration::from_secs(2);

/// How long a test waits before concluding nothing arrives.
pub const QUIET: Duration = Duration::from_millis(150);

/// Collections shared by every node unless a test says otherwise.
pub fn registry() -> Arc<CollectionRegistry> {
    let registry = CollectionRegistry::new();
    registry.insert(Collection::public("pbc_posts", "posts"));
    registry.insert(Collection {
        kind: CollectionKind::Auth,
        ..Collection::public("pbc_users", "users")
    });
    registry.insert(Collection {
        list_rule: Some("@request.auth.role = 'editor'".to_string()),
        view_rule: Some("@request.auth.role = 'editor'".to_string()),
        ..Collection::public("pbc_drafts", "drafts")
    });
    Arc::new(registry)
}

/// A started engine attached to `hub`.
pub async fn node(hub: &Arc<MemoryBridgeHub>, collections: Arc<CollectionRegistry>) -> RealtimeEngine {
    node_on(Arc::new(hub.transport()), collections).await
}

/// A started engine on any transport.
pub async fn node_on(
    transport: Arc<dyn BridgeTransport>,
    collections: Arc<CollectionRegistry>,
) -> RealtimeEngine {
    let engine = RealtimeEngine::builder(RealtimeConfig::default(), transport, collections).build();
    engine.start().await.expect("engine should start");
    engine
}

/// Hub transport whose listener can be cut off. Writes still reach the
/// hub; notifications arriving while cut off are lost.
#[derive(Debug, Clone)]
pub struct PartitionedTransport {
    inner: MemoryBridgeTransport,
    cut_off: Arc<AtomicBool>,
}

impl PartitionedTransport {
    pub fn new(inner: MemoryBridgeTransport) -> Self {
        Self {
            inner,
            cut_off: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start dropping notifications.
    pub fn partition(&self) {
        self.cut_off.store(true, Ordering::SeqCst);
    }

    /// Deliver notifications again.
    pub fn heal(&self) {
        self.cut_off.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BridgeTransport for PartitionedTransport {
    async fn listen(&self) -> AppResult<EnvelopeStream> {
        let cut_off = Arc::clone(&self.cut_off);
        let stream = self.inner.listen().await?;
        Ok(stream
            .filter(move |_| {
                let keep = !cut_off.load(Ordering::SeqCst);
                async move { keep }
            })
            .boxed())
    }

    async fn publish_upsert(&self, row: &ClientSubscription) -> AppResult<()> {
        self.inner.publish_upsert(row).await
    }

    async fn publish_delete(&self, client_id: ClientId, updated_by: ChannelId) -> AppResult<bool> {
        self.inner.publish_delete(client_id, updated_by).await
    }

    async fn deliver(
        &self,
        target: ChannelId,
        client_id: ClientId,
        message: &Message,
    ) -> AppResult<()> {
        self.inner.deliver(target, client_id, message).await
    }

    async fn find_subscription(&self, client_id: ClientId) -> AppResult<Option<ClientSubscription>> {
        self.inner.find_subscription(client_id).await
    }

    async fn foreign_subscriptions(
        &self,
        channel_id: ChannelId,
    ) -> AppResult<Vec<ClientSubscription>> {
        self.inner.foreign_subscriptions(channel_id).await
    }

    async fn renew_lease(&self, channel_id: ChannelId, lease: Duration) -> AppResult<bool> {
        self.inner.renew_lease(channel_id, lease).await
    }

    async fn sweep_expired(&self, swept_by: ChannelId) -> AppResult<Vec<EvictedClient>> {
        self.inner.sweep_expired(swept_by).await
    }

    async fn release_lease(&self, channel_id: ChannelId) -> AppResult<()> {
        self.inner.release_lease(channel_id).await
    }

    async fn take_spooled(
        &self,
        spool_id: Uuid,
        target: ChannelId,
    ) -> AppResult<Option<BridgeEnvelope>> {
        self.inner.take_spooled(spool_id, target).await
    }

    async fn purge_spool(&self, age: Duration) -> AppResult<u64> {
        self.inner.purge_spool(age).await
    }

    async fn live_channels(&self) -> AppResult<u64> {
        self.inner.live_channels().await
    }
}

/// Build a record of a registered collection.
pub fn record(collections: &CollectionRegistry, collection: &str, row: Value) -> Record {
    collections
        .record_from_row(collection, &row)
        .expect("valid record row")
}

/// An identity from the `users` collection.
pub fn user(collections: &CollectionRegistry, id: &str, role: &str) -> Arc<Record> {
    Arc::new(record(collections, "users", json!({"id": id, "role": role})))
}

/// A connected client whose session runs in the background.
pub struct TestClient {
    pub id: ClientId,
    pub inbox: mpsc::Receiver<Message>,
    pub task: JoinHandle<SessionEnd>,
}

impl TestClient {
    /// Next message, failing the test if none arrives in time.
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(PROPAGATION, self.inbox.recv())
            .await
            .expect("message should arrive")
            .expect("session should be open")
    }

    /// Assert that nothing arrives for a short while.
    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(message)) = tokio::time::timeout(QUIET, self.inbox.recv()).await {
            panic!("unexpected message on {}: {}", message.name, message.data_str());
        }
    }
}

/// Connect a client to `engine` and consume its connect message.
pub async fn connect(engine: &RealtimeEngine) -> TestClient {
    let session = engine.connect().await.expect("connect");
    let id = session.client().id();
    let (tx, inbox) = mpsc::channel(32);
    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.serve(session, tx).await }
    });

    let mut client = TestClient { id, inbox, task };
    let hello = client.recv().await;
    assert_eq!(hello.name, "PB_CONNECT");
    client
}

/// Poll `check` until it holds or the propagation window closes.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + PROPAGATION;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until `engine` knows `client_id` (as a mirror or locally).
pub async fn wait_known(engine: &RealtimeEngine, client_id: ClientId) {
    eventually("client to be mirrored", move || async move {
        engine.broker.client_by_id(client_id).is_some()
    })
    .await;
}

/// Wait until `engine` no longer knows `client_id`.
pub async fn wait_forgotten(engine: &RealtimeEngine, client_id: ClientId) {
    eventually("client to be forgotten", move || async move {
        engine.broker.client_by_id(client_id).is_none()
    })
    .await;
}

/// Payload of a record change message.
pub fn payload(message: &Message) -> Value {
    serde_json::from_slice(&message.data).expect("json payload")
}

/// Subscription list from string literals.
pub fn topics(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}
