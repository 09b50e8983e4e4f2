//! Collection definitions consumed by the realtime broadcaster.
//!
//! Schema management lives elsewhere; this section only carries what the
//! fan-out needs: identity, kind, the three access rules, and which fields
//! are hidden from non-privileged readers.

use serde::{Deserialize, Serialize};

/// Kind of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKindConfig {
    /// Plain data collection.
    #[default]
    Base,
    /// Identity-bearing collection whose records can authenticate.
    Auth,
}

/// One `[[collections]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Stable collection id.
    pub id: String,
    /// Collection name (used in topics).
    pub name: String,
    /// Collection kind.
    #[serde(default)]
    pub kind: CollectionKindConfig,
    /// List rule. Absent means superusers only, empty means everyone.
    #[serde(default)]
    pub list_rule: Option<String>,
    /// View rule. Absent means superusers only, empty means everyone.
    #[serde(default)]
    pub view_rule: Option<String>,
    /// Manage rule (auth collections only).
    #[serde(default)]
    pub manage_rule: Option<String>,
    /// Schema fields. Empty accepts every field as known.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Fields hidden from everyone but the owner, managers and superusers.
    #[serde(default)]
    pub hidden_fields: Vec<String>,
}
