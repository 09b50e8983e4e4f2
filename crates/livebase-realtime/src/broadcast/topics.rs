//! Topic prefixes a record change is published under.

use livebase_entity::record::Collection;

/// Which collection rule guards a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Collection-wide topics.
    List,
    /// Single-record topics.
    View,
}

impl RuleKind {
    /// The guarding expression. `None` means locked to superusers.
    pub fn rule<'a>(&self, collection: &'a Collection) -> Option<&'a str> {
        match self {
            Self::List => collection.list_rule.as_deref(),
            Self::View => collection.view_rule.as_deref(),
        }
    }
}

/// A topic prefix and the rule that guards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPrefix {
    /// Prefix a subscription must equal, or be followed by `?`.
    pub prefix: String,
    /// Guarding rule.
    pub rule: RuleKind,
}

/// Prefixes for a change to record `record_id`: the record topics by name
/// and id, the wildcard topics, and the bare collection aliases.
pub fn prefixes(collection: &Collection, record_id: &str) -> Vec<TopicPrefix> {
    let candidates = [
        (format!("{}/{}", collection.name, record_id), RuleKind::View),
        (format!("{}/{}", collection.id, record_id), RuleKind::View),
        (format!("{}/*", collection.name), RuleKind::List),
        (format!("{}/*", collection.id), RuleKind::List),
        (collection.name.clone(), RuleKind::List),
        (collection.id.clone(), RuleKind::List),
    ];

    let mut out: Vec<TopicPrefix> = Vec::with_capacity(candidates.len());
    for (prefix, rule) in candidates {
        if out.iter().any(|existing| existing.prefix == prefix) {
            continue;
        }
        out.push(TopicPrefix { prefix, rule });
    }
    out
}
