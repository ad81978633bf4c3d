//! HTTP API surface.

pub mod data;
pub mod etl;
pub mod health;
pub mod response;
pub mod stats;

use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::error::AppError;
use crate::etl::{CircuitBreaker, EtlOrchestrator};
use crate::middleware;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub orchestrator: Arc<EtlOrchestrator>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Build the application router with all routes and middleware.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let api_v1 = Router::new()
        .route("/data", get(data::list_data))
        .route("/stats", get(stats::get_stats))
        .route("/runs", get(stats::list_runs))
        .route("/checkpoints", get(stats::list_checkpoints))
        .route("/etl/run", post(etl::run_all))
        .route("/etl/run/:source", post(etl::run_source));

    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health::health_check))
        .nest("/api/v1", api_v1)
        .with_state(state)
        // Layers apply innermost first.
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors));

    middleware::rate_limit::apply(router, &config.api_rate_limit)
}

/// Run one database query through the circuit breaker. While the circuit is
/// open callers get an immediate 503 instead of queueing on a pool that is
/// already timing out; results feed the breaker so the health picture stays
/// shared across endpoints.
pub(crate) async fn guarded_query<T, Fut>(
    breaker: &CircuitBreaker,
    query: Fut,
) -> Result<T, AppError>
where
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    if !breaker.allow_request() {
        return Err(AppError::Unavailable("database circuit open".to_string()));
    }
    match query.await {
        Ok(value) => {
            breaker.record_success();
            Ok(value)
        },
        Err(err) => {
            breaker.record_failure();
            Err(AppError::Database(err))
        },
    }
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "CDP Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}
