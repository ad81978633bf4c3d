//! CoinPaprika tickers adapter.
//!
//! `/tickers` has no server-side since-filter, so every run pulls a full
//! snapshot of the top tickers. The timestamp checkpoint records when the
//! last snapshot was taken; it is advisory bookkeeping and does not filter
//! the fetch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_common::types::{CheckpointKind, SourceTag};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::etl::checkpoint::CheckpointStore;
use crate::etl::config::CoinPaprikaConfig;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::http::ApiClient;
use crate::etl::models::{NormalizedRecord, RawRecord};
use crate::etl::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::etl::sources::SourceAdapter;
use crate::etl::store::{load_records, LoadOutcome, RecordStore};

#[derive(Debug, Deserialize)]
struct TickerRow {
    id: String,
    name: String,
    symbol: String,
    rank: Option<i32>,
    quotes: Option<TickerQuotes>,
}

#[derive(Debug, Deserialize)]
struct TickerQuotes {
    #[serde(rename = "USD")]
    usd: Option<UsdQuote>,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    price: Option<f64>,
    volume_24h: Option<f64>,
    market_cap: Option<f64>,
    percent_change_24h: Option<f64>,
}

pub struct CoinPaprikaAdapter {
    config: CoinPaprikaConfig,
    client: ApiClient,
    checkpoints: Arc<dyn CheckpointStore>,
    records: Arc<dyn RecordStore>,
}

impl CoinPaprikaAdapter {
    pub fn new(
        config: CoinPaprikaConfig,
        limits: &RateLimitConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        records: Arc<dyn RecordStore>,
    ) -> EtlResult<Self> {
        let limiter = Arc::new(RateLimiter::new(limits.clone()));
        let mut client = ApiClient::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
            limiter,
            SourceTag::CoinPaprika.as_str(),
            limits.retry_policy(),
        )?;
        if let Some(key) = &config.api_key {
            client = client.with_api_key("Authorization", key.clone());
        }

        Ok(Self {
            config,
            client,
            checkpoints,
            records,
        })
    }
}

#[async_trait]
impl SourceAdapter for CoinPaprikaAdapter {
    fn source(&self) -> SourceTag {
        SourceTag::CoinPaprika
    }

    async fn extract(&self) -> EtlResult<Vec<RawRecord>> {
        if let Some(previous) = self
            .checkpoints
            .get(SourceTag::CoinPaprika, CheckpointKind::Timestamp)
            .await?
        {
            debug!(last_snapshot = %previous.value, "taking a fresh snapshot");
        }

        let body = self.client.get_json("tickers", &[]).await?;
        let items = body
            .as_array()
            .ok_or_else(|| EtlError::validation("expected a JSON array from tickers"))?;

        let snapshot_at = Utc::now();
        let origin = format!("tickers@{}", snapshot_at.format("%Y%m%dT%H%M%SZ"));
        let mut raws = Vec::new();
        for (idx, item) in items.iter().take(self.config.snapshot_limit).enumerate() {
            match serde_json::from_value::<TickerRow>(item.clone()) {
                Ok(_) => raws.push(RawRecord::new(
                    SourceTag::CoinPaprika,
                    origin.clone(),
                    idx as i32 + 1,
                    item.clone(),
                )),
                Err(err) => warn!(%origin, position = idx + 1, %err, "skipping malformed ticker"),
            }
        }

        if !raws.is_empty() {
            self.records.insert_raw(&raws).await?;
        }
        self.checkpoints
            .set(
                SourceTag::CoinPaprika,
                CheckpointKind::Timestamp,
                &snapshot_at.to_rfc3339(),
                Some(json!({ "records_extracted": raws.len() })),
            )
            .await?;

        info!(records = raws.len(), "snapshot extracted");
        Ok(raws)
    }

    fn transform(&self, raw: &[RawRecord]) -> Vec<NormalizedRecord> {
        raw.iter()
            .filter_map(|record| {
                let row: TickerRow = match serde_json::from_value(record.payload.clone()) {
                    Ok(row) => row,
                    Err(err) => {
                        warn!(origin = %record.origin, position = record.position, %err,
                            "dropping unmappable ticker");
                        return None;
                    },
                };
                let usd = row.quotes.and_then(|q| q.usd);

                let normalized = NormalizedRecord {
                    id: Uuid::new_v4(),
                    coin_id: row.id,
                    name: row.name,
                    symbol: Some(row.symbol.to_uppercase()),
                    price_usd: usd.as_ref().and_then(|q| q.price),
                    market_cap_usd: usd.as_ref().and_then(|q| q.market_cap),
                    volume_24h_usd: usd.as_ref().and_then(|q| q.volume_24h),
                    rank: row.rank,
                    percent_change_24h: usd.as_ref().and_then(|q| q.percent_change_24h),
                    source: SourceTag::CoinPaprika,
                    raw_id: record.id,
                    processed_at: Utc::now(),
                };
                if normalized.is_valid() {
                    Some(normalized)
                } else {
                    warn!(origin = %record.origin, position = record.position,
                        "dropping ticker without identity");
                    None
                }
            })
            .collect()
    }

    async fn load(&self, records: &[NormalizedRecord]) -> EtlResult<LoadOutcome> {
        load_records(self.records.as_ref(), records).await
    }
}
