//! Request identity resolution.
//!
//! Tokens are issued by the external auth service. A token names the auth
//! collection and record id of its holder and carries the record's fields,
//! so the realtime layer can evaluate rules without a database round trip.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use livebase_core::config::AuthConfig;
use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;
use livebase_entity::record::{CollectionRegistry, Record};

/// Registered claims that are not record fields.
const RESERVED_CLAIMS: &[&str] = &["sub", "collection", "exp", "iat", "nbf", "iss", "aud", "jti"];

/// Maps request headers to the identity making the request.
#[async_trait]
pub trait IdentityResolver: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` for guests; an error for a presented but invalid token.
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Option<Record>>;
}

/// Claims of an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Record id.
    pub sub: String,
    /// Auth collection id or name.
    pub collection: String,
    /// Expiry (UNIX seconds).
    pub exp: i64,
    /// Record fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// HS256 token verifier backed by the collection registry.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
    collections: Arc<CollectionRegistry>,
}

impl std::fmt::Debug for JwtIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityResolver")
            .field("collections", &self.collections.len())
            .finish()
    }
}

impl JwtIdentityResolver {
    /// Create a resolver from the `[auth]` section.
    pub fn new(config: &AuthConfig, collections: Arc<CollectionRegistry>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            collections,
        }
    }

    /// Verify `token` and rebuild the identity it names.
    pub fn verify(&self, token: &str) -> AppResult<Record> {
        let data = decode::<IdentityClaims>(token, &self.key, &self.validation).map_err(|e| {
            AppError::with_source(ErrorKind::Authentication, "Invalid or expired token", e)
        })?;
        let claims = data.claims;

        let collection = self.collections.find(&claims.collection).ok_or_else(|| {
            AppError::authentication(format!("Unknown auth collection '{}'", claims.collection))
        })?;
        if !collection.is_auth() {
            return Err(AppError::authentication(format!(
                "Collection '{}' cannot authenticate",
                collection.name
            )));
        }

        let mut row: Map<String, Value> = claims
            .fields
            .into_iter()
            .filter(|(key, _)| !RESERVED_CLAIMS.contains(&key.as_str()))
            .collect();
        row.insert("id".to_string(), Value::String(claims.sub));

        Record::from_row(collection, &Value::Object(row))
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Option<Record>> {
        let Some(header) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let raw = header
            .to_str()
            .map_err(|_| AppError::authentication("Invalid Authorization header"))?
            .trim();

        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if token.is_empty() {
            return Ok(None);
        }

        let record = self.verify(token)?;
        debug!(
            collection = %record.collection().name,
            record_id = %record.id(),
            "Resolved request identity"
        );
        Ok(Some(record))
    }
}
