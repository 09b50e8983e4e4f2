//! Record model.

use std::sync::Arc;

use serde_json::{Map, Value};

use livebase_core::error::AppError;
use livebase_core::result::AppResult;

use super::collection::{AUTH_SECRET_FIELDS, Collection};

/// Keys that describe the record itself rather than its data.
const SYSTEM_KEYS: &[&str] = &["id", "collectionId", "collectionName", "expand"];

/// A single row of a collection as the realtime layer sees it.
///
/// Data is split into schema fields and unknown ("custom") fields so that a
/// clean copy can drop everything the schema does not declare.
#[derive(Debug, Clone)]
pub struct Record {
    id: String,
    collection: Arc<Collection>,
    data: Map<String, Value>,
    custom: Map<String, Value>,
    expand: Map<String, Value>,
    reveal_hidden: bool,
}

impl Record {
    /// Create an empty record.
    pub fn new(collection: Arc<Collection>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collection,
            data: Map::new(),
            custom: Map::new(),
            expand: Map::new(),
            reveal_hidden: false,
        }
    }

    /// Build a record from a serialized row (a JSON object carrying `id`).
    pub fn from_row(collection: Arc<Collection>, row: &Value) -> AppResult<Self> {
        let object = row
            .as_object()
            .ok_or_else(|| AppError::validation("Record row must be a JSON object"))?;

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::validation("Record row is missing a string id"))?;

        let mut record = Self::new(collection, id);
        for (key, value) in object {
            if SYSTEM_KEYS.contains(&key.as_str()) {
                continue;
            }
            record.set(key, value.clone());
        }
        Ok(record)
    }

    /// Record id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The collection this record belongs to.
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// Read a field. `id`, `collectionId` and `collectionName` resolve to the
    /// record's own identity.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.clone())),
            "collectionId" => Some(Value::String(self.collection.id.clone())),
            "collectionName" => Some(Value::String(self.collection.name.clone())),
            _ => self
                .data
                .get(field)
                .or_else(|| self.custom.get(field))
                .cloned(),
        }
    }

    /// Write a field, routing it to the schema or custom bucket.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if self.collection.is_known_field(&field) {
            self.data.insert(field, value);
        } else {
            self.custom.insert(field, value);
        }
    }

    /// Mutable access to the expand map.
    pub fn expand_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.expand
    }

    /// Show or hide fields that are normally hidden from readers.
    pub fn reveal_hidden(&mut self, reveal: bool) {
        self.reveal_hidden = reveal;
    }

    /// Copy holding only the schema data: no expand, no unknown fields,
    /// hidden fields concealed.
    pub fn clean_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            collection: Arc::clone(&self.collection),
            data: self.data.clone(),
            custom: Map::new(),
            expand: Map::new(),
            reveal_hidden: false,
        }
    }

    /// Check whether the record is a superuser identity.
    pub fn is_superuser(&self) -> bool {
        self.collection.is_superusers()
    }

    /// Check whether `other` is the same row of the same collection.
    pub fn same_identity(&self, other: &Record) -> bool {
        self.id == other.id && self.collection.id == other.collection.id
    }

    /// Export as seen by a reader.
    pub fn public_export(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.id.clone()));
        out.insert(
            "collectionId".to_string(),
            Value::String(self.collection.id.clone()),
        );
        out.insert(
            "collectionName".to_string(),
            Value::String(self.collection.name.clone()),
        );

        for (key, value) in self.data.iter().chain(self.custom.iter()) {
            if self.is_concealed(key) {
                continue;
            }
            out.insert(key.clone(), value.clone());
        }

        if !self.expand.is_empty() {
            out.insert("expand".to_string(), Value::Object(self.expand.clone()));
        }

        Value::Object(out)
    }

    /// Full row, hidden fields included, secrets excluded. This is the form
    /// stored on the bridge so a sibling can rebuild the identity.
    pub fn to_row(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.id.clone()));
        for (key, value) in self.data.iter().chain(self.custom.iter()) {
            if self.collection.is_auth() && AUTH_SECRET_FIELDS.contains(&key.as_str()) {
                continue;
            }
            out.insert(key.clone(), value.clone());
        }
        Value::Object(out)
    }

    fn is_concealed(&self, field: &str) -> bool {
        if self.collection.is_auth() && AUTH_SECRET_FIELDS.contains(&field) {
            return true;
        }
        if self.reveal_hidden {
            return false;
        }
        if self.collection.is_hidden_field(field) {
            return true;
        }
        self.collection.is_auth()
            && field == "email"
            && self.data.get("emailVisibility") != Some(&Value::Bool(true))
    }
}
