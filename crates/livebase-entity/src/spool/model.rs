//! Message spool row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use livebase_core::types::ChannelId;

/// A bridge envelope too large for a single notification, parked until the
/// target instance takes it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpooledMessage {
    /// Spool entry id, carried by the notification that points at it.
    pub id: Uuid,
    /// Instance that should consume the entry.
    pub target_channel_id: ChannelId,
    /// Serialized envelope.
    pub payload: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}
