//! Channel lease repository.

use std::time::Duration;

use sqlx::{FromRow, PgConnection, PgPool};

use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;
use livebase_core::types::ChannelId;
use livebase_entity::channel::ChannelLease;

#[derive(FromRow)]
struct RenewedLease {
    #[sqlx(flatten)]
    lease: ChannelLease,
    created: bool,
}

/// Repository for `realtime_channel_leases`. All time comparisons use the
/// database clock.
#[derive(Debug, Clone)]
pub struct ChannelLeaseRepository {
    pool: PgPool,
}

impl ChannelLeaseRepository {
    /// Create a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim or extend the lease of `channel_id` to `NOW() + lease`.
    /// The flag is `true` when the row was inserted rather than updated.
    pub async fn renew(
        &self,
        channel_id: ChannelId,
        lease: Duration,
    ) -> AppResult<(ChannelLease, bool)> {
        let renewed = sqlx::query_as::<_, RenewedLease>(
            "INSERT INTO realtime_channel_leases (channel_id, valid_until, started_at) \
             VALUES ($1, NOW() + make_interval(secs => $2), NOW()) \
             ON CONFLICT (channel_id) DO UPDATE SET valid_until = EXCLUDED.valid_until \
             RETURNING channel_id, valid_until, started_at, (xmax = 0) AS created",
        )
        .bind(channel_id)
        .bind(lease.as_secs_f64())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to renew channel lease", e)
        })?;
        Ok((renewed.lease, renewed.created))
    }

    /// Channels other than `except` that are dead: their lease ran out, or
    /// they own rows without holding a lease at all.
    pub async fn find_expired(&self, except: ChannelId) -> AppResult<Vec<ChannelId>> {
        sqlx::query_scalar::<_, ChannelId>(
            "SELECT channel_id FROM realtime_channel_leases \
             WHERE valid_until <= NOW() AND channel_id <> $1 \
             UNION \
             SELECT DISTINCT s.channel_id FROM realtime_client_subscriptions s \
             LEFT JOIN realtime_channel_leases l ON l.channel_id = s.channel_id \
             WHERE l.channel_id IS NULL AND s.channel_id <> $1",
        )
        .bind(except)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find expired channels", e)
        })
    }

    /// Number of channels holding a valid lease.
    pub async fn count_live(&self) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM realtime_channel_leases WHERE valid_until > NOW()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count channels", e))
    }

    /// Drop a lease row inside the caller's transaction.
    pub async fn delete(conn: &mut PgConnection, channel_id: ChannelId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM realtime_channel_leases WHERE channel_id = $1")
            .bind(channel_id)
            .execute(conn)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to delete channel lease", e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Give up this instance's lease.
    pub async fn release(&self, channel_id: ChannelId) -> AppResult<()> {
        sqlx::query("DELETE FROM realtime_channel_leases WHERE channel_id = $1")
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to release channel lease", e)
            })?;
        Ok(())
    }
}
