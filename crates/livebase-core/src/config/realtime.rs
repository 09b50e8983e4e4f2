//! Realtime fan-out and cross-instance bridge configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Realtime engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Bounded mailbox size per client; messages beyond it are dropped.
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    /// Seconds without outbound traffic before a connection is closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    /// Interval between lease renewals and eviction sweeps.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Lease length granted by each renewal.
    #[serde(default = "default_lease")]
    pub lease_seconds: u64,
    /// Shared notification channel name.
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
    /// How long a staged delete notification may wait for its commit.
    #[serde(default = "default_dry_cache_ttl")]
    pub dry_cache_ttl_seconds: u64,
    /// Upper bound on staged delete notifications.
    #[serde(default = "default_dry_cache_capacity")]
    pub dry_cache_capacity: u64,
    /// Maximum topics accepted in one subscription call.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_client: usize,
    /// Maximum length of a single topic string.
    #[serde(default = "default_max_topic_length")]
    pub max_topic_length: usize,
    /// Use the PostgreSQL bridge. When false, an in-process bridge is used
    /// and the instance runs stand-alone.
    #[serde(default = "default_true")]
    pub bridge_enabled: bool,
}

impl RealtimeConfig {
    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Lease length as a [`Duration`].
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    /// Staged delete TTL as a [`Duration`].
    pub fn dry_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dry_cache_ttl_seconds)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            mailbox_size: default_mailbox_size(),
            idle_timeout_seconds: default_idle_timeout(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            lease_seconds: default_lease(),
            notify_channel: default_notify_channel(),
            dry_cache_ttl_seconds: default_dry_cache_ttl(),
            dry_cache_capacity: default_dry_cache_capacity(),
            max_subscriptions_per_client: default_max_subscriptions(),
            max_topic_length: default_max_topic_length(),
            bridge_enabled: true,
        }
    }
}

fn default_mailbox_size() -> usize {
    256
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_lease() -> u64 {
    30
}

fn default_notify_channel() -> String {
    "livebase_realtime".to_string()
}

fn default_dry_cache_ttl() -> u64 {
    60
}

fn default_dry_cache_capacity() -> u64 {
    10_000
}

fn default_max_subscriptions() -> usize {
    1000
}

fn default_max_topic_length() -> usize {
    2500
}

fn default_true() -> bool {
    true
}
