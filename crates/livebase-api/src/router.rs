//! Route definitions for the Livebase HTTP API.
//!
//! All routes are mounted under `/api`. The router receives `AppState` and
//! passes it to all handlers via Axum's `State` extractor.

use axum::Router;
use axum::routing::get;

use crate::handlers;
use crate::state::AppState;

/// Build the API routes.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(realtime_routes())
        .merge(health_routes());

    Router::new().nest("/api", api_routes).with_state(state)
}

/// Realtime endpoints: SSE connect and subscription updates
fn realtime_routes() -> Router<AppState> {
    Router::new().route(
        "/realtime",
        get(handlers::realtime::connect).post(handlers::realtime::set_subscriptions),
    )
}

/// Health endpoint
fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health))
}
