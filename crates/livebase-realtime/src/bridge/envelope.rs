//! Bridge notification payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};
use livebase_entity::subscription::ClientSubscription;

use crate::message::Message;

/// One notification exchanged between instances, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeEnvelope {
    /// A client row was inserted or replaced.
    SubscriptionUpsert {
        /// The client.
        client_id: ClientId,
        /// Instance holding the client's connection.
        channel_id: ChannelId,
        /// Instance that wrote the row.
        updated_by: ChannelId,
        /// The row, unless it was too large to inline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscription: Option<ClientSubscription>,
    },
    /// A client row was removed by a disconnect or an empty subscription set.
    SubscriptionDelete {
        /// The client.
        client_id: ClientId,
        /// Instance that removed the row.
        updated_by: ChannelId,
    },
    /// A client row was removed because its instance's lease ran out.
    SubscriptionEvict {
        /// The client.
        client_id: ClientId,
        /// The dead instance.
        channel_id: ChannelId,
        /// Instance that ran the sweep.
        swept_by: ChannelId,
    },
    /// A message for a client held by `target_channel`.
    MessageDeliver {
        /// Instance holding the client.
        target_channel: ChannelId,
        /// Recipient.
        client_id: ClientId,
        /// Message topic.
        topic: String,
        /// Message payload.
        data: String,
    },
    /// A `MessageDeliver` parked in the spool table.
    MessageSpooled {
        /// Instance that should take the entry.
        target_channel: ChannelId,
        /// Spool entry id.
        spool_id: Uuid,
    },
}

impl BridgeEnvelope {
    /// Deliver envelope for `message`.
    pub fn deliver(target_channel: ChannelId, client_id: ClientId, message: &Message) -> Self {
        Self::MessageDeliver {
            target_channel,
            client_id,
            topic: message.name.clone(),
            data: message.data_str().to_string(),
        }
    }

    /// Upsert envelope carrying the row inline.
    pub fn upsert(row: &ClientSubscription) -> Self {
        Self::SubscriptionUpsert {
            client_id: row.client_id,
            channel_id: row.channel_id,
            updated_by: row.updated_by_channel_id,
            subscription: Some(row.clone()),
        }
    }

    /// The same upsert without the row.
    pub fn without_row(self) -> Self {
        match self {
            Self::SubscriptionUpsert {
                client_id,
                channel_id,
                updated_by,
                ..
            } => Self::SubscriptionUpsert {
                client_id,
                channel_id,
                updated_by,
                subscription: None,
            },
            other => other,
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire payload.
    pub fn decode(payload: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscriptionUpsert { .. } => "subscription_upsert",
            Self::SubscriptionDelete { .. } => "subscription_delete",
            Self::SubscriptionEvict { .. } => "subscription_evict",
            Self::MessageDeliver { .. } => "message_deliver",
            Self::MessageSpooled { .. } => "message_spooled",
        }
    }
}
