//! CDP Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cdp_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::info;

use cdp_server::api::{create_router, AppState};
use cdp_server::config::Config;
use cdp_server::db;
use cdp_server::etl::{build_orchestrator, CircuitBreaker, CircuitBreakerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over the built-in defaults.
    let log_config = LogConfig::from_env().unwrap_or_else(|_| {
        LogConfig::default()
            .with_file_prefix("cdp-server")
            .with_filter_directives("cdp_server=debug,tower_http=debug,sqlx=info")
    });
    init_logging(&log_config)?;

    info!("Starting CDP Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = db::create_pool(&config.database).await?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    let orchestrator = Arc::new(build_orchestrator(&config.etl, db_pool.clone())?);
    info!(sources = orchestrator.sources().len(), "ETL orchestrator wired");

    let state = AppState {
        db: db_pool,
        orchestrator,
        breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
    };

    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
