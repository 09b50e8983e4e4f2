//! A single realtime subscriber.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use livebase_core::types::ClientId;
use livebase_entity::record::Record;

use crate::message::Message;

use super::options::SubscriptionOptions;

/// Subscriptions and identity of a client, replaced together so a reader
/// never sees new subscriptions paired with an old identity.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    /// Raw subscription → decoded options. Ordered, so prefix lookups are
    /// range scans.
    pub subscriptions: BTreeMap<String, SubscriptionOptions>,
    /// Bound identity.
    pub auth: Option<Arc<Record>>,
}

impl ClientState {
    /// Subscriptions under `prefix`: the bare prefix or the prefix followed
    /// by a query string.
    pub fn matching(&self, prefix: &str) -> Vec<(&str, &SubscriptionOptions)> {
        self.subscriptions
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(raw, _)| raw.starts_with(prefix))
            .filter(|(raw, _)| raw.len() == prefix.len() || raw[prefix.len()..].starts_with('?'))
            .map(|(raw, options)| (raw.as_str(), options))
            .collect()
    }

    /// Raw subscriptions, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }
}

/// Result of queueing a message on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued on the mailbox.
    Queued,
    /// Mailbox full, message dropped.
    Dropped,
    /// Mailbox closed, client is gone.
    Closed,
    /// Client was discarded.
    Discarded,
    /// Client has no mailbox on this instance.
    Detached,
}

/// One logical subscriber.
///
/// A client created for a local connection owns the sending half of its
/// mailbox; a mirror of a client held by a sibling instance has none.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    mailbox: Option<mpsc::Sender<Message>>,
    state: RwLock<ClientState>,
    discarded: AtomicBool,
    cancel: CancellationToken,
}

impl Client {
    /// Create a client with a fresh id and a bounded mailbox.
    pub fn new(mailbox_size: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(mailbox_size.max(1));
        let client = Self {
            id: ClientId::new(),
            mailbox: Some(tx),
            state: RwLock::new(ClientState::default()),
            discarded: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        };
        (client, rx)
    }

    /// Create a mailbox-less client for an id owned elsewhere.
    pub fn detached(id: ClientId) -> Self {
        Self {
            id,
            mailbox: None,
            state: RwLock::new(ClientState::default()),
            discarded: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Client id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Snapshot of subscriptions and identity.
    pub async fn state(&self) -> ClientState {
        self.state.read().await.clone()
    }

    /// Raw subscriptions, sorted.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.state.read().await.topics()
    }

    /// Remove subscriptions. An empty list removes all of them.
    pub async fn unsubscribe(&self, topics: &[String]) {
        let mut state = self.state.write().await;
        if topics.is_empty() {
            state.subscriptions.clear();
        } else {
            for topic in topics {
                state.subscriptions.remove(topic);
            }
        }
    }

    /// Bound identity.
    pub async fn auth(&self) -> Option<Arc<Record>> {
        self.state.read().await.auth.clone()
    }

    /// Bind or clear the identity.
    pub async fn set_auth(&self, auth: Option<Arc<Record>>) {
        self.state.write().await.auth = auth;
    }

    /// Swap subscriptions and identity in one step.
    pub async fn replace_state(&self, state: ClientState) {
        *self.state.write().await = state;
    }

    /// Queue a message without waiting. Full mailboxes drop the message.
    pub fn send(&self, message: Message) -> SendOutcome {
        if self.is_discarded() {
            return SendOutcome::Discarded;
        }
        let Some(mailbox) = &self.mailbox else {
            return SendOutcome::Detached;
        };
        match mailbox.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(client_id = %self.id, topic = %message.name, "Mailbox full, dropping message");
                SendOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client_id = %self.id, "Mailbox closed, discarding client");
                self.discard();
                SendOutcome::Closed
            }
        }
    }

    /// Whether the client has a mailbox on this instance.
    pub fn has_mailbox(&self) -> bool {
        self.mailbox.is_some()
    }

    /// Mark the client discarded and stop its event loop.
    pub fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Whether the client was discarded.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Resolves once the client is discarded.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::options::parse_subscriptions;

    use super::*;

    async fn subscribe(client: &Client, topics: &[&str]) {
        let subscriptions = parse_subscriptions(topics).expect("valid topics");
        client
            .replace_state(ClientState {
                subscriptions,
                auth: None,
            })
            .await;
    }

    #[tokio::test]
    async fn test_matching_requires_exact_prefix_or_query() {
        let (client, _rx) = Client::new(4);
        subscribe(
            &client,
            &["posts", "posts/*", "posts/*?options=%7B%7D", "postsx", "posts/abc"],
        )
        .await;

        let state = client.state().await;
        let wildcard: Vec<&str> = state.matching("posts/*").into_iter().map(|(raw, _)| raw).collect();
        assert_eq!(wildcard, vec!["posts/*", "posts/*?options=%7B%7D"]);

        let bare: Vec<&str> = state.matching("posts").into_iter().map(|(raw, _)| raw).collect();
        assert_eq!(bare, vec!["posts"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let (client, _rx) = Client::new(4);
        subscribe(&client, &["a", "b"]).await;
        client.unsubscribe(&["a".to_string()]).await;
        assert_eq!(client.subscriptions().await, vec!["b"]);
        client.unsubscribe(&[]).await;
        assert!(client.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_outcomes() {
        let (client, mut rx) = Client::new(1);
        assert_eq!(client.send(Message::new("t", "1")), SendOutcome::Queued);
        assert_eq!(client.send(Message::new("t", "2")), SendOutcome::Dropped);
        assert_eq!(rx.recv().await.map(|m| m.data_str().to_string()), Some("1".to_string()));

        drop(rx);
        assert_eq!(client.send(Message::new("t", "3")), SendOutcome::Closed);
        assert!(client.is_discarded());
        assert_eq!(client.send(Message::new("t", "4")), SendOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_detached_client_has_no_mailbox() {
        let client = Client::detached(ClientId::new());
        assert!(!client.has_mailbox());
        assert_eq!(client.send(Message::new("t", "x")), SendOutcome::Detached);
    }
}
