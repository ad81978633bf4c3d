//! Health endpoint guarded by a circuit breaker.
//!
//! Repeated database probe failures open the breaker; while it is open the
//! endpoint answers 503 without touching the pool, and a half-open probe is
//! let through once the open timeout has elapsed.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::api::AppState;
use crate::db;
use crate::etl::CircuitState;

pub async fn health_check(State(state): State<AppState>) -> Response {
    if !state.breaker.allow_request() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "database": "unavailable",
                "circuit": CircuitState::Open,
            })),
        )
            .into_response();
    }

    match db::health_check(&state.db).await {
        Ok(()) => {
            state.breaker.record_success();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "healthy",
                    "database": "connected",
                    "circuit": state.breaker.state(),
                })),
            )
                .into_response()
        },
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            state.breaker.record_failure();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                    "circuit": state.breaker.state(),
                })),
            )
                .into_response()
        },
    }
}
