//! PostgreSQL transport: rows in the bridge tables, notifications through
//! `LISTEN` / `pg_notify`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::PgListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_database::DatabasePool;
use livebase_database::notify::{fits_notify, notify};
use livebase_database::repositories::{
    ChannelLeaseRepository, ClientSubscriptionRepository, MessageSpoolRepository,
};
use livebase_entity::subscription::ClientSubscription;

use crate::message::Message;

use super::envelope::BridgeEnvelope;
use super::transport::{BridgeTransport, EnvelopeStream, EvictedClient};

/// Bridge transport backed by the shared PostgreSQL database.
///
/// Row writes and their notifications share one transaction, so siblings
/// hear about a change only once it is committed.
#[derive(Debug, Clone)]
pub struct PgBridgeTransport {
    db: DatabasePool,
    notify_channel: String,
    subscriptions: ClientSubscriptionRepository,
    leases: ChannelLeaseRepository,
    spool: MessageSpoolRepository,
}

impl PgBridgeTransport {
    /// Create a transport publishing on `notify_channel`.
    pub fn new(db: DatabasePool, notify_channel: impl Into<String>) -> Self {
        let pool = db.pool().clone();
        Self {
            db,
            notify_channel: notify_channel.into(),
            subscriptions: ClientSubscriptionRepository::new(pool.clone()),
            leases: ChannelLeaseRepository::new(pool.clone()),
            spool: MessageSpoolRepository::new(pool),
        }
    }

    async fn notify_now(&self, payload: &str) -> AppResult<()> {
        let mut conn = self.db.pool().acquire().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to acquire connection", e)
        })?;
        notify(&mut *conn, &self.notify_channel, payload).await
    }

    async fn evict_channel(
        &self,
        channel_id: ChannelId,
        swept_by: ChannelId,
    ) -> AppResult<Vec<EvictedClient>> {
        let mut tx = self.db.begin().await?;
        let client_ids = ClientSubscriptionRepository::delete_by_channel(&mut *tx, channel_id).await?;

        for client_id in &client_ids {
            let payload = BridgeEnvelope::SubscriptionEvict {
                client_id: *client_id,
                channel_id,
                swept_by,
            }
            .encode()?;
            notify(&mut *tx, &self.notify_channel, &payload).await?;
        }
        ChannelLeaseRepository::delete(&mut *tx, channel_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit channel eviction", e)
        })?;

        Ok(client_ids
            .into_iter()
            .map(|client_id| EvictedClient {
                channel_id,
                client_id,
            })
            .collect())
    }
}

#[async_trait]
impl BridgeTransport for PgBridgeTransport {
    async fn listen(&self) -> AppResult<EnvelopeStream> {
        let mut listener = PgListener::connect_with(self.db.pool())
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to open listener", e))?;
        listener.listen(&self.notify_channel).await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to listen on bridge channel", e)
        })?;
        info!(channel = %self.notify_channel, "Listening for bridge notifications");

        // `recv` reconnects on the next call after a connection error.
        let stream = futures::stream::unfold(listener, |mut listener| async move {
            let item = match listener.recv().await {
                Ok(notification) => BridgeEnvelope::decode(notification.payload()),
                Err(e) => Err(AppError::with_source(
                    ErrorKind::Database,
                    "Bridge listener connection failed",
                    e,
                )),
            };
            Some((item, listener))
        });
        Ok(stream.boxed())
    }

    async fn publish_upsert(&self, row: &ClientSubscription) -> AppResult<()> {
        let envelope = BridgeEnvelope::upsert(row);
        let mut payload = envelope.encode()?;
        if !fits_notify(&payload) {
            payload = envelope.without_row().encode()?;
        }

        let mut tx = self.db.begin().await?;
        ClientSubscriptionRepository::upsert(&mut *tx, row).await?;
        notify(&mut *tx, &self.notify_channel, &payload).await?;
        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit subscription upsert", e)
        })
    }

    async fn publish_delete(&self, client_id: ClientId, updated_by: ChannelId) -> AppResult<bool> {
        let payload = BridgeEnvelope::SubscriptionDelete {
            client_id,
            updated_by,
        }
        .encode()?;

        let mut tx = self.db.begin().await?;
        let existed = ClientSubscriptionRepository::delete(&mut *tx, client_id).await?;
        notify(&mut *tx, &self.notify_channel, &payload).await?;
        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit subscription delete", e)
        })?;
        Ok(existed)
    }

    async fn deliver(
        &self,
        target: ChannelId,
        client_id: ClientId,
        message: &Message,
    ) -> AppResult<()> {
        let payload = BridgeEnvelope::deliver(target, client_id, message).encode()?;
        if fits_notify(&payload) {
            return self.notify_now(&payload).await;
        }

        let spool_id = self.spool.insert(target, &payload).await?;
        let pointer = BridgeEnvelope::MessageSpooled {
            target_channel: target,
            spool_id,
        }
        .encode()?;
        self.notify_now(&pointer).await
    }

    async fn find_subscription(&self, client_id: ClientId) -> AppResult<Option<ClientSubscription>> {
        self.subscriptions.find(client_id).await
    }

    async fn foreign_subscriptions(
        &self,
        channel_id: ChannelId,
    ) -> AppResult<Vec<ClientSubscription>> {
        self.subscriptions.find_foreign_live(channel_id).await
    }

    async fn renew_lease(&self, channel_id: ChannelId, lease: Duration) -> AppResult<bool> {
        let (claimed, created) = self.leases.renew(channel_id, lease).await?;
        if created {
            debug!(
                channel_id = %channel_id,
                valid_until = %claimed.valid_until,
                "Claimed channel lease"
            );
        }
        Ok(created)
    }

    async fn sweep_expired(&self, swept_by: ChannelId) -> AppResult<Vec<EvictedClient>> {
        let expired = self.leases.find_expired(swept_by).await?;
        let mut evicted = Vec::new();
        for channel_id in expired {
            match self.evict_channel(channel_id, swept_by).await {
                Ok(clients) => evicted.extend(clients),
                Err(e) => {
                    warn!(channel_id = %channel_id, error = %e, "Failed to evict expired channel");
                }
            }
        }
        Ok(evicted)
    }

    async fn release_lease(&self, channel_id: ChannelId) -> AppResult<()> {
        self.leases.release(channel_id).await
    }

    async fn take_spooled(
        &self,
        spool_id: Uuid,
        target: ChannelId,
    ) -> AppResult<Option<BridgeEnvelope>> {
        match self.spool.take(spool_id, target).await? {
            Some(entry) => BridgeEnvelope::decode(&entry.payload).map(Some),
            None => Ok(None),
        }
    }

    async fn purge_spool(&self, age: Duration) -> AppResult<u64> {
        self.spool.purge_older_than(age).await
    }

    async fn live_channels(&self) -> AppResult<u64> {
        let count = self.leases.count_live().await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
