//! Pending delete notifications.
//!
//! Access to a deleted record must be evaluated while the row still
//! exists, but subscribers must not hear about the delete before it
//! commits. Messages computed before the delete wait here, grouped per
//! (action, collection, record) and then per client, until the commit
//! flushes them or the delete is rolled back. Entries also expire on their
//! own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use tokio::sync::Mutex;

use livebase_core::types::ClientId;
use livebase_entity::record::RecordAction;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DryKey {
    action: RecordAction,
    collection_id: String,
    record_id: String,
}

impl DryKey {
    fn new(action: RecordAction, collection_id: &str, record_id: &str) -> Self {
        Self {
            action,
            collection_id: collection_id.to_string(),
            record_id: record_id.to_string(),
        }
    }
}

/// Messages parked for one key. A slot is closed once taken or discarded;
/// a push that finds it closed starts a new slot.
#[derive(Debug)]
struct Slot {
    parked_at: Instant,
    closed: bool,
    by_client: HashMap<ClientId, Vec<Message>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            parked_at: Instant::now(),
            closed: false,
            by_client: HashMap::new(),
        }
    }
}

/// Two-phase store for messages that may only be sent after a commit.
#[derive(Debug, Clone)]
pub struct DryCache {
    entries: Cache<DryKey, Arc<Mutex<Slot>>>,
    ttl: Duration,
}

impl DryCache {
    /// Create a cache bounded by `capacity` pending deletes and `ttl` per
    /// delete.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    /// Park a message for `client_id`.
    pub async fn push(
        &self,
        client_id: ClientId,
        action: RecordAction,
        collection_id: &str,
        record_id: &str,
        message: Message,
    ) {
        let key = DryKey::new(action, collection_id, record_id);
        loop {
            let slot = self
                .entries
                .get_with(key.clone(), async { Arc::new(Mutex::new(Slot::new())) })
                .await;
            let mut slot = slot.lock().await;
            if slot.closed {
                // Taken between lookup and lock; the key is free again.
                continue;
            }
            slot.by_client.entry(client_id).or_default().push(message);
            return;
        }
    }

    /// Remove and return every parked message for the record, grouped by
    /// client. A second call returns nothing.
    pub async fn take(
        &self,
        action: RecordAction,
        collection_id: &str,
        record_id: &str,
    ) -> Vec<(ClientId, Vec<Message>)> {
        let Some(slot) = self.close(action, collection_id, record_id).await else {
            return Vec::new();
        };
        if slot.parked_at.elapsed() > self.ttl {
            return Vec::new();
        }
        slot.by_client
            .into_iter()
            .filter(|(_, messages)| !messages.is_empty())
            .collect()
    }

    /// Drop every parked message for the record. Returns how many clients
    /// had messages waiting.
    pub async fn discard(&self, action: RecordAction, collection_id: &str, record_id: &str) -> usize {
        self.close(action, collection_id, record_id)
            .await
            .map_or(0, |slot| slot.by_client.len())
    }

    /// Number of records with pending messages.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Whether nothing is pending.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn close(&self, action: RecordAction, collection_id: &str, record_id: &str) -> Option<Slot> {
        let key = DryKey::new(action, collection_id, record_id);
        let slot = self.entries.remove(&key).await?;
        let mut slot = slot.lock().await;
        slot.closed = true;
        Some(Slot {
            parked_at: slot.parked_at,
            closed: true,
            by_client: std::mem::take(&mut slot.by_client),
        })
    }
}
