//! Client subscription row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_core::types::{ChannelId, ClientId};

/// Fleet-wide record of one connected client.
///
/// Exactly one row exists per connected client, no matter which instance
/// holds the connection. Siblings use it to build proxies that route
/// messages back to `channel_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClientSubscription {
    /// The client this row describes.
    pub client_id: ClientId,
    /// The instance holding the client's connection.
    pub channel_id: ChannelId,
    /// Raw subscription topics, sorted and deduplicated.
    pub subscriptions: Vec<String>,
    /// Collection of the bound identity.
    pub auth_collection_ref: Option<String>,
    /// Record id of the bound identity.
    pub auth_record_ref: Option<String>,
    /// Serialized identity record, used by siblings to rehydrate it.
    pub auth_record: Option<serde_json::Value>,
    /// The instance that wrote this version of the row.
    pub updated_by_channel_id: ChannelId,
    /// When this version was written.
    pub updated_at: DateTime<Utc>,
}

impl ClientSubscription {
    /// Anonymous row without subscriptions, written by its own instance.
    pub fn seed(client_id: ClientId, channel_id: ChannelId) -> Self {
        Self {
            client_id,
            channel_id,
            subscriptions: Vec::new(),
            auth_collection_ref: None,
            auth_record_ref: None,
            auth_record: None,
            updated_by_channel_id: channel_id,
            updated_at: Utc::now(),
        }
    }

    /// Check that the auth references are either both set or both empty,
    /// and that a snapshot accompanies them.
    pub fn validate(&self) -> AppResult<()> {
        match (
            &self.auth_collection_ref,
            &self.auth_record_ref,
            &self.auth_record,
        ) {
            (None, None, None) | (Some(_), Some(_), Some(_)) => Ok(()),
            _ => Err(AppError::validation(format!(
                "Client subscription {} has a partial auth reference",
                self.client_id
            ))),
        }
    }
}
