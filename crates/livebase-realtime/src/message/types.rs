//! Message type definitions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use livebase_core::result::AppResult;
use livebase_core::types::ClientId;
use livebase_entity::record::RecordAction;

/// Topic of the first message on every new connection.
pub const CONNECT_TOPIC: &str = "PB_CONNECT";

/// A topic name plus an immutable payload.
///
/// Cloning is cheap: the payload is shared, so one marshalled record can be
/// queued for many recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message is published on.
    pub name: String,
    /// Serialized payload.
    pub data: Bytes,
}

impl Message {
    /// Create a message from raw bytes.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Serialize `payload` as JSON.
    pub fn json<T: Serialize>(name: impl Into<String>, payload: &T) -> AppResult<Self> {
        let data = serde_json::to_vec(payload)?;
        Ok(Self::new(name, data))
    }

    /// The connect message announcing a fresh client id.
    pub fn connect(client_id: ClientId) -> AppResult<Self> {
        Self::json(CONNECT_TOPIC, &ConnectPayload { client_id })
    }

    /// Payload as text. Payloads are always JSON.
    pub fn data_str(&self) -> &str {
        std::str::from_utf8(&self.data).unwrap_or_default()
    }
}

/// Body of the connect message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    /// The id the client must use when subscribing.
    pub client_id: ClientId,
}

/// Body of a record change message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordChangePayload {
    /// What happened to the record.
    pub action: RecordAction,
    /// The record as exported for the recipient.
    pub record: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_connect_message_shape() {
        let id = ClientId::new();
        let message = Message::connect(id).expect("connect message");
        assert_eq!(message.name, "PB_CONNECT");
        let body: Value = serde_json::from_slice(&message.data).expect("valid json");
        assert_eq!(body, json!({"clientId": id.to_string()}));
    }

    #[test]
    fn test_record_change_shape() {
        let payload = RecordChangePayload {
            action: RecordAction::Delete,
            record: json!({"id": "r1"}),
        };
        let message = Message::json("posts/r1", &payload).expect("json message");
        assert_eq!(message.data_str(), r#"{"action":"delete","record":{"id":"r1"}}"#);
    }
}
