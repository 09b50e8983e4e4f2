//! Relation expansion seam.

use std::fmt;

use async_trait::async_trait;

use livebase_core::result::AppResult;
use livebase_entity::record::Record;

use super::context::RequestInfo;

/// Resolves relation paths into the record's expand map, enforcing the
/// related collections' rules for the requester in `info`.
#[async_trait]
pub trait RecordExpander: Send + Sync + fmt::Debug {
    /// Expand `paths` on `record`.
    async fn expand(
        &self,
        record: &mut Record,
        paths: &[String],
        info: &RequestInfo,
    ) -> AppResult<()>;
}

/// Expander for hosts without relations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExpander;

#[async_trait]
impl RecordExpander for NoopExpander {
    async fn expand(
        &self,
        _record: &mut Record,
        _paths: &[String],
        _info: &RequestInfo,
    ) -> AppResult<()> {
        Ok(())
    }
}
