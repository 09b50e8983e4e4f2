//! Request DTOs with validation.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// `POST /api/realtime` body.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetSubscriptionsRequest {
    /// Client id announced in the `PB_CONNECT` message.
    #[validate(length(min = 1, max = 64, message = "clientId is required"))]
    pub client_id: String,
    /// The full new subscription set. Empty unsubscribes from everything.
    #[serde(default)]
    pub subscriptions: Vec<String>,
}
