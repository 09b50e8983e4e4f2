//! Shared-store seam of the bridge.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::subscription::ClientSubscription;

use crate::message::Message;

use super::envelope::BridgeEnvelope;

/// Stream of notifications seen by one instance, its own included.
pub type EnvelopeStream = BoxStream<'static, AppResult<BridgeEnvelope>>;

/// A client row removed by a lease sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictedClient {
    /// The dead instance.
    pub channel_id: ChannelId,
    /// The evicted client.
    pub client_id: ClientId,
}

/// Persistence and notification primitives the bridge needs from the store.
///
/// Every write that changes a client row also emits the matching
/// notification, and the two become visible together.
#[async_trait]
pub trait BridgeTransport: Send + Sync + fmt::Debug {
    /// Start receiving notifications.
    async fn listen(&self) -> AppResult<EnvelopeStream>;

    /// Insert or replace `row` and announce it.
    async fn publish_upsert(&self, row: &ClientSubscription) -> AppResult<()>;

    /// Delete the row of `client_id` if present and announce the removal.
    /// Returns whether a row existed.
    async fn publish_delete(&self, client_id: ClientId, updated_by: ChannelId) -> AppResult<bool>;

    /// Route `message` to `client_id` on instance `target`.
    async fn deliver(&self, target: ChannelId, client_id: ClientId, message: &Message)
    -> AppResult<()>;

    /// Load the row of one client.
    async fn find_subscription(&self, client_id: ClientId) -> AppResult<Option<ClientSubscription>>;

    /// Rows owned by other live instances.
    async fn foreign_subscriptions(&self, channel_id: ChannelId)
    -> AppResult<Vec<ClientSubscription>>;

    /// Push this instance's lease to now + `lease`. Returns `true` when no
    /// lease was held, either on first claim or after a sibling swept it.
    async fn renew_lease(&self, channel_id: ChannelId, lease: Duration) -> AppResult<bool>;

    /// Delete every row owned by an instance whose lease has run out,
    /// announcing each eviction. Concurrent sweeps evict each row once.
    async fn sweep_expired(&self, swept_by: ChannelId) -> AppResult<Vec<EvictedClient>>;

    /// Drop this instance's lease.
    async fn release_lease(&self, channel_id: ChannelId) -> AppResult<()>;

    /// Take a spooled envelope addressed to `target`.
    async fn take_spooled(&self, spool_id: Uuid, target: ChannelId)
    -> AppResult<Option<BridgeEnvelope>>;

    /// Drop spooled envelopes nobody took within `age`.
    async fn purge_spool(&self, age: Duration) -> AppResult<u64>;

    /// Number of instances holding a valid lease.
    async fn live_channels(&self) -> AppResult<u64>;
}
