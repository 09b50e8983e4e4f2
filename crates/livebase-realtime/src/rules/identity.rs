//! Identity rehydration.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_entity::record::{CollectionRegistry, Record};

/// Rebuilds an identity from a collection reference and its stored row.
#[async_trait]
pub trait IdentityRehydrator: Send + Sync + fmt::Debug {
    /// Rehydrate the identity. Unknown or non-auth collections are errors.
    async fn rehydrate(&self, collection_ref: &str, row: &Value) -> AppResult<Record>;
}

#[async_trait]
impl IdentityRehydrator for CollectionRegistry {
    async fn rehydrate(&self, collection_ref: &str, row: &Value) -> AppResult<Record> {
        let record = self.record_from_row(collection_ref, row)?;
        if !record.collection().is_auth() {
            return Err(AppError::validation(format!(
                "Collection '{collection_ref}' does not hold identities"
            )));
        }
        Ok(record)
    }
}
