//! Channel lease row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use livebase_core::types::ChannelId;

/// Liveness claim of one running instance.
///
/// The owning instance pushes `valid_until` forward on every heartbeat.
/// Once it lies in the past, any sibling may evict the channel's clients.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChannelLease {
    /// The instance holding the lease.
    pub channel_id: ChannelId,
    /// When the lease runs out unless renewed.
    pub valid_until: DateTime<Utc>,
    /// When the instance first claimed the lease.
    pub started_at: DateTime<Utc>,
}

impl ChannelLease {
    /// Check whether the lease has run out at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until <= now
    }
}
