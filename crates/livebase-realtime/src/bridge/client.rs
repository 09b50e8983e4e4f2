//! Location-transparent client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::subscription::ClientSubscription;

use crate::connection::client::{Client, ClientState, SendOutcome};
use crate::connection::options::parse_subscriptions;
use crate::message::Message;

use super::link::BridgeLink;

/// A [`Client`] together with the instance that holds its connection.
///
/// Senders call [`BridgedClient::send`] without caring where the client
/// lives: local clients get the message on their mailbox, remote ones get
/// it through the bridge.
#[derive(Debug)]
pub struct BridgedClient {
    client: Client,
    channel_id: ChannelId,
    link: BridgeLink,
    /// Whether a row for this client may exist in the store.
    stored: AtomicBool,
}

impl BridgedClient {
    /// Create a client for a connection accepted by this instance.
    pub fn new_local(link: BridgeLink, mailbox_size: usize) -> (Self, mpsc::Receiver<Message>) {
        let (client, mailbox) = Client::new(mailbox_size);
        let bridged = Self {
            client,
            channel_id: link.channel_id(),
            link,
            stored: AtomicBool::new(false),
        };
        (bridged, mailbox)
    }

    /// Create the mirror of a client announced by a sibling. Its state is
    /// filled in by [`BridgedClient::receive_changes`].
    pub fn new_remote(link: BridgeLink, row: &ClientSubscription) -> Self {
        Self {
            client: Client::detached(row.client_id),
            channel_id: row.channel_id,
            link,
            stored: AtomicBool::new(true),
        }
    }

    /// Client id.
    pub fn id(&self) -> ClientId {
        self.client.id()
    }

    /// Instance holding the connection.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The wrapped client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether the connection lives on another instance.
    pub fn is_remote(&self) -> bool {
        self.channel_id != self.link.channel_id()
    }

    /// Whether the client was discarded.
    pub fn is_discarded(&self) -> bool {
        self.client.is_discarded()
    }

    /// Discard the client. Later sends are no-ops.
    pub fn discard(&self) {
        self.client.discard();
    }

    /// Deliver `message`. Never waits on the recipient.
    pub fn send(&self, message: Message) {
        if self.is_discarded() {
            return;
        }

        let metrics = self.link.metrics();
        if self.is_remote() {
            metrics.message_bridged();
            let transport = Arc::clone(self.link.transport());
            let metrics = Arc::clone(metrics);
            let target = self.channel_id;
            let client_id = self.id();
            tokio::spawn(async move {
                if let Err(e) = transport.deliver(target, client_id, &message).await {
                    metrics.message_dropped();
                    warn!(
                        client_id = %client_id,
                        channel_id = %target,
                        error = %e,
                        "Failed to route message through the bridge"
                    );
                }
            });
            return;
        }

        match self.client.send(message) {
            SendOutcome::Queued => metrics.message_delivered(),
            SendOutcome::Dropped | SendOutcome::Closed => metrics.message_dropped(),
            SendOutcome::Discarded | SendOutcome::Detached => {}
        }
    }

    /// The row describing this client's current state.
    pub async fn snapshot(&self) -> ClientSubscription {
        let state = self.client.state().await;
        let mut row = ClientSubscription::seed(self.id(), self.channel_id);
        row.subscriptions = state.topics();
        row.updated_by_channel_id = self.link.channel_id();
        if let Some(auth) = &state.auth {
            row.auth_collection_ref = Some(auth.collection().id.clone());
            row.auth_record_ref = Some(auth.id().to_string());
            row.auth_record = Some(auth.to_row());
        }
        row
    }

    /// Persist the current state and announce it. An empty subscription
    /// set takes the client offline instead.
    pub async fn broadcast_changes(&self) -> AppResult<()> {
        let row = self.snapshot().await;
        if row.subscriptions.is_empty() {
            return self.broadcast_go_offline().await;
        }
        self.stored.store(true, Ordering::Release);
        self.link.transport().publish_upsert(&row).await?;
        debug!(
            client_id = %row.client_id,
            subscriptions = row.subscriptions.len(),
            "Broadcast client changes"
        );
        Ok(())
    }

    /// Remove the persisted row and announce the removal. A client whose
    /// row was never written skips the store entirely.
    pub async fn broadcast_go_offline(&self) -> AppResult<()> {
        if !self.stored.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self
            .link
            .transport()
            .publish_delete(self.id(), self.link.channel_id())
            .await
        {
            self.stored.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(client_id = %self.id(), "Broadcast client offline");
        Ok(())
    }

    /// Apply a row written by another instance. Subscriptions and identity
    /// change together; ids never change. Fails without touching state if
    /// the identity cannot be rehydrated.
    pub async fn receive_changes(&self, row: &ClientSubscription) -> AppResult<()> {
        if row.client_id != self.id() {
            return Err(AppError::validation(format!(
                "Row for client {} applied to client {}",
                row.client_id,
                self.id()
            )));
        }
        row.validate()?;

        let auth = match (&row.auth_collection_ref, &row.auth_record) {
            (Some(collection_ref), Some(auth_record)) => {
                let record = self
                    .link
                    .rehydrator()
                    .rehydrate(collection_ref, auth_record)
                    .await
                    .map_err(|e| {
                        AppError::with_source(
                            e.kind,
                            format!(
                                "Failed to rehydrate identity {}/{} for client {}",
                                collection_ref,
                                row.auth_record_ref.as_deref().unwrap_or_default(),
                                row.client_id
                            ),
                            e,
                        )
                    })?;
                Some(Arc::new(record))
            }
            _ => None,
        };

        let subscriptions = parse_subscriptions(&row.subscriptions)?;

        self.client
            .replace_state(ClientState {
                subscriptions,
                auth,
            })
            .await;
        self.stored.store(true, Ordering::Release);
        Ok(())
    }
}
