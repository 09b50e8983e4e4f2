//! `CallerIdentity` extractor: resolves the identity behind a request, if any.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use livebase_core::error::AppError;
use livebase_entity::record::Record;

use crate::state::AppState;

/// Identity of the caller, `None` for guests.
///
/// A request without an `Authorization` header is a guest; a request with
/// an invalid token is rejected.
#[derive(Debug, Clone, Default)]
pub struct CallerIdentity(pub Option<Arc<Record>>);

impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = state.identity.resolve(&parts.headers).await?;
        Ok(CallerIdentity(identity.map(Arc::new)))
    }
}
