//! Realtime engine metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level counters.
#[derive(Debug, Default)]
pub struct RealtimeMetrics {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    messages_delivered: AtomicU64,
    messages_dropped: AtomicU64,
    messages_bridged: AtomicU64,
    notifications_received: AtomicU64,
    evictions: AtomicU64,
    broadcast_errors: AtomicU64,
}

impl RealtimeMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// A local connection was accepted.
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// A local connection ended.
    pub fn connection_closed(&self) {
        // Saturating: shutdown and the session loop may both report a close.
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// A message was queued on a local mailbox.
    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was dropped (full or closed mailbox, failed bridge hop).
    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was handed to the bridge for a remote client.
    pub fn message_bridged(&self) {
        self.messages_bridged.fetch_add(1, Ordering::Relaxed);
    }

    /// A bridge notification was received.
    pub fn notification_received(&self) {
        self.notifications_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Clients were evicted after a lease expired.
    pub fn clients_evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// A per-subscriber broadcast step failed.
    pub fn broadcast_error(&self) {
        self.broadcast_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_bridged: self.messages_bridged.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            broadcast_errors: self.broadcast_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Local connections ever accepted.
    pub connections_total: u64,
    /// Local connections currently open.
    pub connections_active: u64,
    /// Messages queued on local mailboxes.
    pub messages_delivered: u64,
    /// Messages dropped.
    pub messages_dropped: u64,
    /// Messages routed through the bridge.
    pub messages_bridged: u64,
    /// Bridge notifications received.
    pub notifications_received: u64,
    /// Clients evicted by lease sweeps.
    pub evictions: u64,
    /// Failed per-subscriber broadcast steps.
    pub broadcast_errors: u64,
}
