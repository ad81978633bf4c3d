//! ETL trigger endpoints.
//!
//! POST /api/v1/etl/run runs every registered source; POST
//! /api/v1/etl/run/{source} runs one. Source failures are reported in the
//! response body, not as HTTP errors: the trigger itself succeeded.

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::json;

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::ApiResult;
use crate::etl::RunResult;

#[derive(Debug, Deserialize)]
pub struct RunAllQuery {
    /// Run sources concurrently instead of in canonical order.
    #[serde(default)]
    pub concurrent: bool,
}

pub async fn run_all(
    State(state): State<AppState>,
    Query(query): Query<RunAllQuery>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let results = if query.concurrent {
        state.orchestrator.clone().run_all_concurrent().await
    } else {
        state.orchestrator.run_all().await
    };

    let failed = results
        .values()
        .filter(|r| r.error.is_some())
        .count();

    Ok(ApiResponse::success(json!({
        "sources": results.len(),
        "failed": failed,
        "results": results,
    })))
}

pub async fn run_source(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> ApiResult<ApiResponse<RunResult>> {
    let result = state.orchestrator.run_source_by_name(&source).await?;
    Ok(ApiResponse::success(result))
}
