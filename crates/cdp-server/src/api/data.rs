//! Normalized market data listing.

use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::api::response::{ApiResponse, PaginationMeta};
use crate::api::{guarded_query, AppState};
use crate::error::{ApiResult, AppError};

const DEFAULT_PER_PAGE: i64 = 50;
const MAX_PER_PAGE: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub source: Option<String>,
    pub symbol: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DataRow {
    pub id: Uuid,
    pub coin_id: String,
    pub name: String,
    pub symbol: Option<String>,
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub rank: Option<i32>,
    pub percent_change_24h: Option<f64>,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &DataQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(ref source) = query.source {
        builder.push(" AND source = ").push_bind(source.clone());
    }
    if let Some(ref symbol) = query.symbol {
        builder
            .push(" AND symbol = ")
            .push_bind(symbol.to_uppercase());
    }
    if let Some(min_price) = query.min_price {
        builder.push(" AND price_usd >= ").push_bind(min_price);
    }
    if let Some(max_price) = query.max_price {
        builder.push(" AND price_usd <= ").push_bind(max_price);
    }
}

pub async fn list_data(
    State(state): State<AppState>,
    Query(query): Query<DataQuery>,
) -> ApiResult<ApiResponse<Vec<DataRow>>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    if let Some(ref source) = query.source {
        source
            .parse::<cdp_common::types::SourceTag>()
            .map_err(|_| AppError::BadRequest(format!("unknown source: {source}")))?;
    }

    let mut count_builder =
        QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM normalized_records");
    push_filters(&mut count_builder, &query);
    let total: i64 = guarded_query(
        &state.breaker,
        count_builder.build_query_scalar().fetch_one(&state.db),
    )
    .await?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT id, coin_id, name, symbol, price_usd, market_cap_usd, volume_24h_usd, \
         rank, percent_change_24h, source, processed_at FROM normalized_records",
    );
    push_filters(&mut builder, &query);
    builder
        .push(" ORDER BY processed_at DESC, coin_id LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind((page - 1) * per_page);

    let rows: Vec<DataRow> =
        guarded_query(&state.breaker, builder.build_query_as().fetch_all(&state.db)).await?;

    let meta = serde_json::to_value(PaginationMeta::new(page, per_page, total))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(ApiResponse::success_with_meta(rows, meta))
}
