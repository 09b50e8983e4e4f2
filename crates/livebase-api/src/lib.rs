//! # livebase-api
//!
//! HTTP API layer for Livebase built on Axum.
//!
//! Provides the realtime SSE endpoint, the subscription update endpoint,
//! health reporting, request identity resolution, and the middleware stack
//! (CORS, tracing, request logging).

pub mod app;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::build_app;
pub use identity::{IdentityResolver, JwtIdentityResolver};
pub use state::AppState;
