//! Transactional notifications.

use sqlx::PgConnection;

use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;

/// Largest payload sent through `pg_notify`. PostgreSQL rejects payloads of
/// 8000 bytes or more; the margin leaves room for the channel name.
pub const MAX_NOTIFY_PAYLOAD_BYTES: usize = 7900;

/// Queue a notification on `channel`. Listeners receive it when the
/// surrounding transaction commits, or immediately outside a transaction.
pub async fn notify(conn: &mut PgConnection, channel: &str, payload: &str) -> AppResult<()> {
    if payload.len() > MAX_NOTIFY_PAYLOAD_BYTES {
        return Err(AppError::validation(format!(
            "Notification payload of {} bytes exceeds the {MAX_NOTIFY_PAYLOAD_BYTES} byte limit",
            payload.len()
        )));
    }

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(payload)
        .execute(conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to send notification", e))?;
    Ok(())
}

/// Whether `payload` fits in a single notification.
pub fn fits_notify(payload: &str) -> bool {
    payload.len() <= MAX_NOTIFY_PAYLOAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_notify_boundary() {
        assert!(fits_notify(&"x".repeat(MAX_NOTIFY_PAYLOAD_BYTES)));
        assert!(!fits_notify(&"x".repeat(MAX_NOTIFY_PAYLOAD_BYTES + 1)));
    }
}
