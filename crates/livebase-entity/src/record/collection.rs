//! Collection model.

use serde::{Deserialize, Serialize};

use livebase_core::config::{CollectionConfig, CollectionKindConfig};

/// Name of the collection whose records bypass every access rule.
pub const SUPERUSERS_COLLECTION: &str = "_superusers";

/// Auth collection fields that never leave the server.
pub const AUTH_SECRET_FIELDS: &[&str] = &["password", "tokenKey"];

/// Kind of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Plain data collection.
    Base,
    /// Identity-bearing collection.
    Auth,
}

/// The parts of a collection definition the realtime layer reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Stable collection id.
    pub id: String,
    /// Collection name.
    pub name: String,
    /// Collection kind.
    pub kind: CollectionKind,
    /// List rule (`None` = superusers only, `""` = everyone).
    pub list_rule: Option<String>,
    /// View rule (`None` = superusers only, `""` = everyone).
    pub view_rule: Option<String>,
    /// Manage rule, only meaningful for auth collections.
    pub manage_rule: Option<String>,
    /// Schema fields. Empty means every field is known.
    pub fields: Vec<String>,
    /// Fields hidden from non-privileged readers.
    pub hidden_fields: Vec<String>,
}

impl Collection {
    /// Create a base collection with public list and view rules.
    pub fn public(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: CollectionKind::Base,
            list_rule: Some(String::new()),
            view_rule: Some(String::new()),
            manage_rule: None,
            fields: Vec::new(),
            hidden_fields: Vec::new(),
        }
    }

    /// Check whether the collection holds identities.
    pub fn is_auth(&self) -> bool {
        self.kind == CollectionKind::Auth
    }

    /// Check whether the collection is the superusers collection.
    pub fn is_superusers(&self) -> bool {
        self.is_auth() && self.name == SUPERUSERS_COLLECTION
    }

    /// Check whether `field` belongs to the schema.
    pub fn is_known_field(&self, field: &str) -> bool {
        if self.is_auth() && AUTH_SECRET_FIELDS.contains(&field) {
            return false;
        }
        self.fields.is_empty() || self.fields.iter().any(|f| f == field)
    }

    /// Check whether `field` is hidden from non-privileged readers.
    pub fn is_hidden_field(&self, field: &str) -> bool {
        self.hidden_fields.iter().any(|f| f == field)
    }
}

impl From<&CollectionConfig> for Collection {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            kind: match config.kind {
                CollectionKindConfig::Base => CollectionKind::Base,
                CollectionKindConfig::Auth => CollectionKind::Auth,
            },
            list_rule: config.list_rule.clone(),
            view_rule: config.view_rule.clone(),
            manage_rule: config.manage_rule.clone(),
            fields: config.fields.clone(),
            hidden_fields: config.hidden_fields.clone(),
        }
    }
}
