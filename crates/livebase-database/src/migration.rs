//! Database migration runner.

use sqlx::PgPool;
use tracing::info;

use livebase_core::error::{AppError, ErrorKind};
use livebase_core::result::AppResult;

/// Create or upgrade the realtime bridge tables.
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    info!("Running realtime bridge migrations");

    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            AppError::with_source(
                ErrorKind::Database,
                format!("Failed to run migrations: {e}"),
                e,
            )
        })?;

    info!("Realtime bridge migrations applied");
    Ok(())
}
