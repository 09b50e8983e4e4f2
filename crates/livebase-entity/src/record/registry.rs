//! In-memory collection registry.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use livebase_core::config::CollectionConfig;
use livebase_core::error::AppError;
use livebase_core::result::AppResult;

use super::collection::Collection;
use super::model::Record;

/// Collections known to this instance, keyed by id.
///
/// Lookups accept either the id or the name, so subscription topics and
/// bridge rows can use whichever form they carry.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    by_id: DashMap<String, Arc<Collection>>,
}

impl CollectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the configured collections.
    pub fn from_configs(configs: &[CollectionConfig]) -> Self {
        let registry = Self::new();
        for config in configs {
            registry.insert(Collection::from(config));
        }
        registry
    }

    /// Add or replace a collection.
    pub fn insert(&self, collection: Collection) -> Arc<Collection> {
        let collection = Arc::new(collection);
        self.by_id
            .insert(collection.id.clone(), Arc::clone(&collection));
        collection
    }

    /// Find a collection by id or name.
    pub fn find(&self, reference: &str) -> Option<Arc<Collection>> {
        if let Some(found) = self.by_id.get(reference) {
            return Some(Arc::clone(found.value()));
        }
        self.by_id
            .iter()
            .find(|entry| entry.value().name == reference)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Find a collection or fail with a not-found error.
    pub fn require(&self, reference: &str) -> AppResult<Arc<Collection>> {
        self.find(reference)
            .ok_or_else(|| AppError::not_found(format!("Collection '{reference}' not found")))
    }

    /// Rebuild a record of the referenced collection from its stored row.
    pub fn record_from_row(&self, reference: &str, row: &Value) -> AppResult<Record> {
        let collection = self.require(reference)?;
        Record::from_row(collection, row)
    }

    /// Number of registered collections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
