//! Health check handler.

use axum::Json;
use axum::extract::State;
use tracing::warn;

use livebase_core::result::AppResult;

use crate::dto::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> AppResult<Json<ApiResponse<HealthResponse>>> {
    let database = match &state.db {
        None => "disabled",
        Some(db) => match db.health_check().await {
            Ok(true) => "connected",
            Ok(false) => "unavailable",
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                "unavailable"
            }
        },
    };

    let realtime = state.realtime.status().await?;
    let status = if database == "unavailable" { "degraded" } else { "ok" };

    Ok(Json(ApiResponse::ok(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        realtime,
    })))
}
