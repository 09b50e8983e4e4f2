//! Message spool repository.

use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;
use livebase_core::types::ChannelId;
use livebase_entity::spool::SpooledMessage;

/// Repository for `realtime_message_spool`.
#[derive(Debug, Clone)]
pub struct MessageSpoolRepository {
    pool: PgPool,
}

impl MessageSpoolRepository {
    /// Create a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a payload for `target` and return the entry id.
    pub async fn insert(&self, target: ChannelId, payload: &str) -> AppResult<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO realtime_message_spool (id, target_channel_id, payload, created_at) \
             VALUES ($1, $2, $3, NOW())",
        )
        .bind(id)
        .bind(target)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to spool message", e))?;
        Ok(id)
    }

    /// Remove and return an entry addressed to `target`. A second call for
    /// the same id returns `None`.
    pub async fn take(&self, id: Uuid, target: ChannelId) -> AppResult<Option<SpooledMessage>> {
        sqlx::query_as::<_, SpooledMessage>(
            "DELETE FROM realtime_message_spool WHERE id = $1 AND target_channel_id = $2 \
             RETURNING *",
        )
        .bind(id)
        .bind(target)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to take spooled message", e))
    }

    /// Delete entries older than `age`. Returns the number removed.
    pub async fn purge_older_than(&self, age: Duration) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM realtime_message_spool \
             WHERE created_at < NOW() - make_interval(secs => $1)",
        )
        .bind(age.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to purge message spool", e))?;
        Ok(result.rows_affected())
    }
}
