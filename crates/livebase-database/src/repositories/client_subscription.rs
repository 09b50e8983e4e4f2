//! Client subscription repository.

use sqlx::{PgConnection, PgPool};

use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::subscription::ClientSubscription;

/// Repository for `realtime_client_subscriptions`.
///
/// Writes take a connection so callers can pair them with a notification in
/// one transaction.
#[derive(Debug, Clone)]
pub struct ClientSubscriptionRepository {
    pool: PgPool,
}

impl ClientSubscriptionRepository {
    /// Create a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the row of one client.
    pub async fn find(&self, client_id: ClientId) -> AppResult<Option<ClientSubscription>> {
        sqlx::query_as::<_, ClientSubscription>(
            "SELECT * FROM realtime_client_subscriptions WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find client subscription", e)
        })
    }

    /// Rows owned by other instances whose lease is still valid.
    pub async fn find_foreign_live(
        &self,
        channel_id: ChannelId,
    ) -> AppResult<Vec<ClientSubscription>> {
        sqlx::query_as::<_, ClientSubscription>(
            "SELECT s.* FROM realtime_client_subscriptions s \
             JOIN realtime_channel_leases l ON l.channel_id = s.channel_id \
             WHERE s.channel_id <> $1 AND l.valid_until > NOW() \
             ORDER BY s.updated_at",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(
                ErrorKind::Database,
                "Failed to list foreign client subscriptions",
                e,
            )
        })
    }

    /// Insert or replace a row.
    pub async fn upsert(conn: &mut PgConnection, row: &ClientSubscription) -> AppResult<()> {
        row.validate()?;
        sqlx::query(
            "INSERT INTO realtime_client_subscriptions \
             (client_id, channel_id, subscriptions, auth_collection_ref, auth_record_ref, \
              auth_record, updated_by_channel_id, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (client_id) DO UPDATE SET \
               channel_id = EXCLUDED.channel_id, \
               subscriptions = EXCLUDED.subscriptions, \
               auth_collection_ref = EXCLUDED.auth_collection_ref, \
               auth_record_ref = EXCLUDED.auth_record_ref, \
               auth_record = EXCLUDED.auth_record, \
               updated_by_channel_id = EXCLUDED.updated_by_channel_id, \
               updated_at = NOW()",
        )
        .bind(row.client_id)
        .bind(row.channel_id)
        .bind(&row.subscriptions)
        .bind(&row.auth_collection_ref)
        .bind(&row.auth_record_ref)
        .bind(&row.auth_record)
        .bind(row.updated_by_channel_id)
        .execute(conn)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to upsert client subscription", e)
        })?;
        Ok(())
    }

    /// Delete one row if it exists. Returns whether a row was removed.
    pub async fn delete(conn: &mut PgConnection, client_id: ClientId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM realtime_client_subscriptions WHERE client_id = $1")
            .bind(client_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to delete client subscription", e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every row owned by one instance and return the removed ids.
    ///
    /// Concurrent callers serialize on the row locks; the later one gets an
    /// empty list.
    pub async fn delete_by_channel(
        conn: &mut PgConnection,
        channel_id: ChannelId,
    ) -> AppResult<Vec<ClientId>> {
        sqlx::query_scalar::<_, ClientId>(
            "DELETE FROM realtime_client_subscriptions WHERE channel_id = $1 RETURNING client_id",
        )
        .bind(channel_id)
        .fetch_all(conn)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to delete channel clients", e)
        })
    }
}
