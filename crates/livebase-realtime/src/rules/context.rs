//! Synthetic request context for rule evaluation.

use std::sync::Arc;

use serde_json::{Map, Value};

use livebase_entity::record::Record;

use crate::connection::options::SubscriptionOptions;

/// The request a subscriber would have made to read the record directly.
///
/// Built per subscription from its stored options and the subscriber's
/// cached identity, never from the identity that performed the mutation.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// The subscriber's identity, if any.
    pub auth: Option<Arc<Record>>,
    /// Query parameters from the subscription options.
    pub query: Map<String, Value>,
    /// Headers from the subscription options.
    pub headers: Map<String, Value>,
    /// Where the request originates. Always `realtime` here.
    pub context: &'static str,
}

impl RequestInfo {
    /// Context for one subscription of one subscriber.
    pub fn for_subscriber(auth: Option<Arc<Record>>, options: &SubscriptionOptions) -> Self {
        Self {
            auth,
            query: options.query.clone(),
            headers: options.headers.clone(),
            context: "realtime",
        }
    }

    /// Whether the subscriber is a superuser.
    pub fn is_superuser(&self) -> bool {
        self.auth.as_ref().is_some_and(|auth| auth.is_superuser())
    }
}
