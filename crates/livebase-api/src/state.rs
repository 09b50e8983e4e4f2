//! Application state shared across all handlers and middleware.

use std::sync::Arc;

use livebase_core::config::AppConfig;
use livebase_database::DatabasePool;
use livebase_realtime::RealtimeEngine;

use crate::identity::IdentityResolver;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// All fields are cheap to clone across tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// PostgreSQL pool, absent when running on the in-process bridge
    pub db: Option<DatabasePool>,
    /// Realtime engine
    pub realtime: RealtimeEngine,
    /// Request identity resolver
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    /// Bundle the shared services.
    pub fn new(
        config: Arc<AppConfig>,
        db: Option<DatabasePool>,
        realtime: RealtimeEngine,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            config,
            db,
            realtime,
            identity,
        }
    }
}
