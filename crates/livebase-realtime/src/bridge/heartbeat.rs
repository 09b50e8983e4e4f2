//! Lease heartbeat and eviction sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livebase_core::config::RealtimeConfig;
use livebase_core::result::AppResult;

use super::realtime_bridge::RealtimeBridge;
use super::transport::EvictedClient;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Time between heartbeats.
    pub interval: Duration,
    /// How long a renewed lease stays valid.
    pub lease: Duration,
}

impl HeartbeatSettings {
    /// Settings from the `[realtime]` section.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            lease: config.lease(),
        }
    }

    /// Age after which unclaimed spool entries are dropped.
    pub fn spool_retention(&self) -> Duration {
        self.lease * 2
    }
}

/// Outcome of one heartbeat.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatReport {
    /// Clients removed because their instance's lease ran out.
    pub evicted: Vec<EvictedClient>,
    /// Spool entries purged.
    pub purged: u64,
    /// Local clients re-announced after this instance found its own lease
    /// gone.
    pub reannounced: usize,
}

impl RealtimeBridge {
    /// Renew this instance's lease, evict the clients of expired channels,
    /// and purge stale spool entries.
    ///
    /// Finding no lease to renew means a sibling swept this instance while
    /// it was stalled: its rows are gone and the evictions may never have
    /// been heard. Local clients are then written back and the mirrors
    /// reloaded.
    pub async fn heartbeat_once(&self) -> AppResult<HeartbeatReport> {
        let settings = self.heartbeat_settings();
        let transport = self.transport();

        let reclaimed = transport.renew_lease(self.channel_id(), settings.lease).await?;
        let reannounced = if reclaimed {
            self.reannounce().await
        } else {
            0
        };

        let evicted = transport.sweep_expired(self.channel_id()).await?;
        let mut removed = 0u64;
        for entry in &evicted {
            if let Some(client) = self.broker().unregister(entry.client_id) {
                client.discard();
                removed += 1;
            }
        }
        if !evicted.is_empty() {
            self.link().metrics().clients_evicted(removed);
            info!(
                channel_id = %self.channel_id(),
                evicted = evicted.len(),
                "Swept clients of expired channels"
            );
        }

        let purged = match transport.purge_spool(settings.spool_retention()).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = %e, "Failed to purge message spool");
                0
            }
        };

        Ok(HeartbeatReport {
            evicted,
            purged,
            reannounced,
        })
    }

    async fn reannounce(&self) -> usize {
        let mut reannounced = 0;
        for client in self.broker().local_clients() {
            if client.is_discarded() || client.client().subscriptions().await.is_empty() {
                continue;
            }
            match client.broadcast_changes().await {
                Ok(()) => reannounced += 1,
                Err(e) => {
                    warn!(client_id = %client.id(), error = %e, "Failed to re-announce client");
                }
            }
        }

        let mirrored = match self.bootstrap().await {
            Ok(mirrored) => mirrored,
            Err(e) => {
                warn!(error = %e, "Failed to reload sibling clients");
                0
            }
        };
        warn!(
            channel_id = %self.channel_id(),
            reannounced,
            mirrored,
            "Channel lease was lost and has been reclaimed"
        );
        reannounced
    }
}

/// Run [`RealtimeBridge::heartbeat_once`] every interval until cancelled.
pub async fn run_heartbeat(
    bridge: Arc<RealtimeBridge>,
    settings: HeartbeatSettings,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; start() has just renewed the lease.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = bridge.heartbeat_once().await {
                    warn!(channel_id = %bridge.channel_id(), error = %e, "Heartbeat failed");
                }
            }
        }
    }

    debug!(channel_id = %bridge.channel_id(), "Heartbeat loop stopped");
}
