//! Livebase Server: realtime record change delivery over SSE.
//!
//! Main entry point that wires all crates together and starts the server.

use std::future::IntoFuture;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use livebase_api::{AppState, IdentityResolver, JwtIdentityResolver, build_app};
use livebase_core::config::{AppConfig, LogFormat};
use livebase_core::error::{AppError, ErrorKind};
use livebase_database::DatabasePool;
use livebase_database::migration::run_migrations;
use livebase_entity::record::CollectionRegistry;
use livebase_realtime::{BridgeTransport, MemoryBridgeTransport, PgBridgeTransport, RealtimeEngine};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let dir = std::env::var("LIVEBASE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let env = std::env::var("LIVEBASE_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load_from(&dir, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Livebase v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);
    let collections = Arc::new(CollectionRegistry::from_configs(&config.collections));
    tracing::info!(collections = collections.len(), "Collections registered");

    // ── Step 1: Bridge transport ─────────────────────────────────
    let (db, transport): (Option<DatabasePool>, Arc<dyn BridgeTransport>) =
        if config.realtime.bridge_enabled {
            tracing::info!("Connecting to database...");
            let db = DatabasePool::connect(&config.database).await?;
            if config.database.run_migrations {
                run_migrations(db.pool()).await?;
            }
            let transport = PgBridgeTransport::new(db.clone(), config.realtime.notify_channel.clone());
            (Some(db), Arc::new(transport))
        } else {
            tracing::warn!("Realtime bridge disabled, running stand-alone");
            (None, Arc::new(MemoryBridgeTransport::standalone()))
        };

    // ── Step 2: Realtime engine ──────────────────────────────────
    let engine = RealtimeEngine::builder(
        config.realtime.clone(),
        transport,
        Arc::clone(&collections),
    )
    .build();
    engine.start().await?;

    // ── Step 3: HTTP app ─────────────────────────────────────────
    let identity: Arc<dyn IdentityResolver> =
        Arc::new(JwtIdentityResolver::new(&config.auth, collections));
    let state = AppState::new(Arc::clone(&config), db.clone(), engine.clone(), identity);
    let app = build_app(state);

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        AppError::with_source(ErrorKind::Internal, format!("Failed to bind {addr}"), e)
    })?;
    tracing::info!(
        addr = %addr,
        channel_id = %engine.channel_id(),
        "Livebase server listening"
    );

    // ── Step 4: Graceful shutdown ────────────────────────────────
    let (stopping_tx, mut stopping_rx) = watch::channel(false);
    let shutdown_engine = engine.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
            // Resolving here stops the accept loop. Open event streams end
            // once the engine discards their clients.
            tokio::spawn(async move {
                if let Err(e) = shutdown_engine.shutdown().await {
                    tracing::error!(error = %e, "Realtime engine shutdown failed");
                }
                let _ = stopping_tx.send(true);
            });
        })
        .into_future();

    let grace = config.server.shutdown_grace();
    let grace_elapsed = async move {
        if stopping_rx.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| AppError::with_source(ErrorKind::Internal, "HTTP server failed", e))?;
        }
        _ = grace_elapsed => {
            tracing::warn!(grace_seconds = grace.as_secs(), "Grace period elapsed, dropping open connections");
        }
    }

    if let Some(db) = db {
        db.close().await;
    }

    tracing::info!("Livebase server shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
