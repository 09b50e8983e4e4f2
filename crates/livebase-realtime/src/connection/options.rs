//! Subscription topic parsing.
//!
//! A subscription is a topic prefix optionally followed by a query string
//! whose `options` parameter carries percent-encoded JSON:
//!
//! ```text
//! posts/*?options=%7B%22query%22%3A%7B%22filter%22%3A%22status%3D'live'%22%7D%7D
//! ```

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use livebase_core::error::AppError;
use livebase_core::result::AppResult;

/// Query parameter that carries the encoded options.
const OPTIONS_PARAM: &str = "options";

/// Per-subscription request data used to evaluate rules for the subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Query parameters (`filter`, `expand`, `fields`, or anything a rule
    /// reads through `@request.query.*`).
    #[serde(default)]
    pub query: Map<String, Value>,
    /// Headers exposed to rules through `@request.headers.*`.
    #[serde(default)]
    pub headers: Map<String, Value>,
}

impl SubscriptionOptions {
    /// A query option rendered as a string, if present and non-empty.
    pub fn query_str(&self, key: &str) -> Option<String> {
        match self.query.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Comma separated query option split into trimmed, non-empty items.
    pub fn query_list(&self, key: &str) -> Vec<String> {
        self.query_str(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Split a subscription into its topic prefix and decoded options.
pub fn parse_subscription(subscription: &str) -> AppResult<(String, SubscriptionOptions)> {
    let (prefix, query) = match subscription.split_once('?') {
        Some((prefix, query)) => (prefix, Some(query)),
        None => (subscription, None),
    };

    if prefix.is_empty() {
        return Err(AppError::validation(format!(
            "Subscription '{subscription}' has an empty topic"
        )));
    }

    let mut options = SubscriptionOptions::default();
    if let Some(raw) = query.and_then(find_options_param) {
        options = decode_options(raw)?;
    }

    Ok((prefix.to_string(), options))
}

/// Parse a whole subscription set, keyed by the raw subscription. Fails on
/// the first invalid entry.
pub fn parse_subscriptions<I, S>(subscriptions: I) -> AppResult<BTreeMap<String, SubscriptionOptions>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    subscriptions
        .into_iter()
        .map(|subscription| {
            let raw = subscription.as_ref();
            parse_subscription(raw).map(|(_, options)| (raw.to_string(), options))
        })
        .collect()
}

fn find_options_param(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == OPTIONS_PARAM).then_some(value)
    })
}

fn decode_options(raw: &str) -> AppResult<SubscriptionOptions> {
    let plus_decoded = raw.replace('+', " ");
    let decoded = percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map_err(|e| AppError::validation(format!("Subscription options are not valid UTF-8: {e}")))?;

    let mut options: SubscriptionOptions = serde_json::from_str(&decoded)
        .map_err(|e| AppError::validation(format!("Invalid subscription options: {e}")))?;

    options.headers = options
        .headers
        .into_iter()
        .map(|(key, value)| (normalize_header(&key), value))
        .collect();

    Ok(options)
}

/// Header names are matched case-insensitively, with `-` spelled `_`.
pub fn normalize_header(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}
