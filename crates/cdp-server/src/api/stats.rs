//! Platform statistics and ETL bookkeeping endpoints.

use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::response::ApiResponse;
use crate::api::{guarded_query, AppState};
use crate::error::{ApiResult, AppError};

#[derive(Debug, Serialize, sqlx::FromRow)]
struct SourceCount {
    source: String,
    count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct StatusCount {
    status: String,
    count: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RunSummary {
    pub run_id: String,
    pub source: String,
    pub status: String,
    pub records_processed: i64,
    pub records_inserted: i64,
    pub records_failed: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CheckpointSummary {
    pub source: String,
    pub checkpoint_kind: String,
    pub checkpoint_value: String,
    pub metadata: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate view over records, runs and the latest run per source.
pub async fn get_stats(
    State(state): State<AppState>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    let raw_counts: Vec<SourceCount> = guarded_query(
        &state.breaker,
        sqlx::query_as(
            "SELECT source, COUNT(*) AS count FROM raw_records GROUP BY source ORDER BY source",
        )
        .fetch_all(&state.db),
    )
    .await?;

    let normalized_counts: Vec<SourceCount> = guarded_query(
        &state.breaker,
        sqlx::query_as(
            "SELECT source, COUNT(*) AS count FROM normalized_records GROUP BY source \
             ORDER BY source",
        )
        .fetch_all(&state.db),
    )
    .await?;

    let runs_by_status: Vec<StatusCount> = guarded_query(
        &state.breaker,
        sqlx::query_as(
            "SELECT status, COUNT(*) AS count FROM etl_runs GROUP BY status ORDER BY status",
        )
        .fetch_all(&state.db),
    )
    .await?;

    let last_runs: Vec<RunSummary> = guarded_query(
        &state.breaker,
        sqlx::query_as(
            "SELECT DISTINCT ON (source) \
                 run_id, source, status, records_processed, records_inserted, records_failed, \
                 started_at, ended_at, duration_seconds, error_message \
             FROM etl_runs ORDER BY source, started_at DESC",
        )
        .fetch_all(&state.db),
    )
    .await?;

    Ok(ApiResponse::success(json!({
        "raw_records": raw_counts,
        "normalized_records": normalized_counts,
        "runs_by_status": runs_by_status,
        "last_run_per_source": last_runs,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<ApiResponse<Vec<RunSummary>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);

    let runs: Vec<RunSummary> = guarded_query(
        &state.breaker,
        sqlx::query_as(
            "SELECT run_id, source, status, records_processed, records_inserted, records_failed, \
                    started_at, ended_at, duration_seconds, error_message \
             FROM etl_runs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&state.db),
    )
    .await?;

    Ok(ApiResponse::success(runs))
}

#[derive(Debug, Deserialize)]
pub struct CheckpointsQuery {
    pub source: Option<String>,
}

pub async fn list_checkpoints(
    State(state): State<AppState>,
    Query(query): Query<CheckpointsQuery>,
) -> ApiResult<ApiResponse<Vec<CheckpointSummary>>> {
    let checkpoints: Vec<CheckpointSummary> = match query.source {
        Some(ref source) => {
            source
                .parse::<cdp_common::types::SourceTag>()
                .map_err(|_| AppError::BadRequest(format!("unknown source: {source}")))?;
            guarded_query(
                &state.breaker,
                sqlx::query_as(
                    "SELECT source, checkpoint_kind, checkpoint_value, metadata, updated_at \
                     FROM etl_checkpoints WHERE source = $1 ORDER BY checkpoint_kind",
                )
                .bind(source)
                .fetch_all(&state.db),
            )
            .await?
        },
        None => {
            guarded_query(
                &state.breaker,
                sqlx::query_as(
                    "SELECT source, checkpoint_kind, checkpoint_value, metadata, updated_at \
                     FROM etl_checkpoints ORDER BY source, checkpoint_kind",
                )
                .fetch_all(&state.db),
            )
            .await?
        },
    };

    Ok(ApiResponse::success(checkpoints))
}
