//! CoinGecko markets adapter.
//!
//! Page-based incremental extraction over `/coins/markets`, ordered by
//! market cap. The page checkpoint stores the last fully ingested page;
//! each invocation fetches exactly one page (checkpoint + 1) and advances
//! the checkpoint once the page is persisted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_common::types::{CheckpointKind, SourceTag};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::etl::checkpoint::CheckpointStore;
use crate::etl::config::CoinGeckoConfig;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::http::ApiClient;
use crate::etl::models::{NormalizedRecord, RawRecord};
use crate::etl::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::etl::sources::SourceAdapter;
use crate::etl::store::{load_records, LoadOutcome, RecordStore};

/// The subset of a markets row the unified schema cares about.
#[derive(Debug, Deserialize)]
struct MarketRow {
    id: String,
    name: String,
    symbol: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    market_cap_rank: Option<i32>,
    total_volume: Option<f64>,
    price_change_percentage_24h: Option<f64>,
}

pub struct CoinGeckoAdapter {
    config: CoinGeckoConfig,
    client: ApiClient,
    checkpoints: Arc<dyn CheckpointStore>,
    records: Arc<dyn RecordStore>,
}

impl CoinGeckoAdapter {
    pub fn new(
        config: CoinGeckoConfig,
        limits: &RateLimitConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        records: Arc<dyn RecordStore>,
    ) -> EtlResult<Self> {
        let limiter = Arc::new(RateLimiter::new(limits.clone()));
        let mut client = ApiClient::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
            limiter,
            SourceTag::CoinGecko.as_str(),
            limits.retry_policy(),
        )?;
        if let Some(key) = &config.api_key {
            client = client.with_api_key("x-cg-demo-api-key", key.clone());
        }

        Ok(Self {
            config,
            client,
            checkpoints,
            records,
        })
    }

    async fn next_page(&self) -> EtlResult<u32> {
        let checkpoint = self
            .checkpoints
            .get(SourceTag::CoinGecko, CheckpointKind::Page)
            .await?;

        Ok(match checkpoint {
            Some(cp) => match cp.value.parse::<u32>() {
                Ok(page) => page + 1,
                Err(_) => {
                    warn!(value = %cp.value, "unparseable page checkpoint, restarting from page 1");
                    1
                },
            },
            None => 1,
        })
    }
}

#[async_trait]
impl SourceAdapter for CoinGeckoAdapter {
    fn source(&self) -> SourceTag {
        SourceTag::CoinGecko
    }

    async fn extract(&self) -> EtlResult<Vec<RawRecord>> {
        let page = self.next_page().await?;
        let query = [
            ("vs_currency", self.config.vs_currency.clone()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", self.config.page_size.to_string()),
            ("page", page.to_string()),
            ("sparkline", "false".to_string()),
            ("price_change_percentage", "24h".to_string()),
        ];

        let body = self.client.get_json("coins/markets", &query).await?;
        let items = body
            .as_array()
            .ok_or_else(|| EtlError::validation("expected a JSON array from coins/markets"))?;

        let origin = format!("page-{page}");
        let mut raws = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            // Shape-check up front so broken rows never enter raw storage.
            match serde_json::from_value::<MarketRow>(item.clone()) {
                Ok(_) => raws.push(RawRecord::new(
                    SourceTag::CoinGecko,
                    origin.clone(),
                    idx as i32 + 1,
                    item.clone(),
                )),
                Err(err) => {
                    warn!(%origin, position = idx + 1, %err, "skipping malformed market row")
                },
            }
        }

        if raws.is_empty() {
            info!(page, "no market data on this page, checkpoint unchanged");
            return Ok(raws);
        }

        self.records.insert_raw(&raws).await?;
        // Advance only after the page is fully persisted: a failed run must
        // re-fetch the same page next time.
        self.checkpoints
            .set(
                SourceTag::CoinGecko,
                CheckpointKind::Page,
                &page.to_string(),
                Some(json!({ "records_extracted": raws.len(), "extracted_at": Utc::now() })),
            )
            .await?;

        info!(page, records = raws.len(), "page extracted");
        Ok(raws)
    }

    fn transform(&self, raw: &[RawRecord]) -> Vec<NormalizedRecord> {
        raw.iter()
            .filter_map(|record| {
                let row: MarketRow = match serde_json::from_value(record.payload.clone()) {
                    Ok(row) => row,
                    Err(err) => {
                        warn!(origin = %record.origin, position = record.position, %err,
                            "dropping unmappable market row");
                        return None;
                    },
                };

                let normalized = NormalizedRecord {
                    id: Uuid::new_v4(),
                    coin_id: row.id,
                    name: row.name,
                    symbol: Some(row.symbol.to_uppercase()),
                    price_usd: row.current_price,
                    market_cap_usd: row.market_cap,
                    volume_24h_usd: row.total_volume,
                    rank: row.market_cap_rank,
                    percent_change_24h: row.price_change_percentage_24h,
                    source: SourceTag::CoinGecko,
                    raw_id: record.id,
                    processed_at: Utc::now(),
                };
                if normalized.is_valid() {
                    Some(normalized)
                } else {
                    warn!(origin = %record.origin, position = record.position,
                        "dropping market row without identity");
                    None
                }
            })
            .collect()
    }

    async fn load(&self, records: &[NormalizedRecord]) -> EtlResult<LoadOutcome> {
        load_records(self.records.as_ref(), records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::memory::{MemCheckpointStore, MemRecordStore};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(
        base_url: &str,
        checkpoints: Arc<MemCheckpointStore>,
        records: Arc<MemRecordStore>,
    ) -> CoinGeckoAdapter {
        let config = CoinGeckoConfig {
            base_url: base_url.to_string(),
            ..CoinGeckoConfig::default()
        };
        let limits = RateLimitConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RateLimitConfig::default()
        };
        CoinGeckoAdapter::new(config, &limits, checkpoints, records).unwrap()
    }

    fn market(id: &str, name: &str, price: f64) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "symbol": id.chars().take(3).collect::<String>(),
            "current_price": price,
            "market_cap": price * 1e6,
            "market_cap_rank": 1,
            "total_volume": price * 1e4,
            "price_change_percentage_24h": -1.2,
        })
    }

    #[tokio::test]
    async fn first_run_fetches_page_one_and_checkpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([market("bitcoin", "Bitcoin", 50_000.0)])),
            )
            .mount(&server)
            .await;

        let checkpoints = Arc::new(MemCheckpointStore::default());
        let records = Arc::new(MemRecordStore::default());
        let adapter = adapter(&server.uri(), checkpoints.clone(), records.clone());

        let raws = adapter.extract().await.unwrap();
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].origin, "page-1");
        assert_eq!(records.raw().len(), 1);

        let cp = checkpoints
            .get(SourceTag::CoinGecko, CheckpointKind::Page)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.value, "1");
    }

    #[tokio::test]
    async fn resumes_from_page_after_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("page", "4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([market("solana", "Solana", 150.0)])),
            )
            .mount(&server)
            .await;

        let checkpoints = Arc::new(MemCheckpointStore::default());
        checkpoints
            .set(SourceTag::CoinGecko, CheckpointKind::Page, "3", None)
            .await
            .unwrap();
        let records = Arc::new(MemRecordStore::default());
        let adapter = adapter(&server.uri(), checkpoints.clone(), records);

        let raws = adapter.extract().await.unwrap();
        assert_eq!(raws[0].origin, "page-4");

        let cp = checkpoints
            .get(SourceTag::CoinGecko, CheckpointKind::Page)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.value, "4");
    }

    #[tokio::test]
    async fn empty_page_keeps_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let checkpoints = Arc::new(MemCheckpointStore::default());
        checkpoints
            .set(SourceTag::CoinGecko, CheckpointKind::Page, "7", None)
            .await
            .unwrap();
        let adapter = adapter(
            &server.uri(),
            checkpoints.clone(),
            Arc::new(MemRecordStore::default()),
        );

        let raws = adapter.extract().await.unwrap();
        assert!(raws.is_empty());

        let cp = checkpoints
            .get(SourceTag::CoinGecko, CheckpointKind::Page)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.value, "7");
    }

    #[tokio::test]
    async fn transform_maps_and_uppercases_symbol() {
        let server = MockServer::start().await;
        let checkpoints = Arc::new(MemCheckpointStore::default());
        let records = Arc::new(MemRecordStore::default());
        let adapter = adapter(&server.uri(), checkpoints, records);

        let raw = RawRecord::new(
            SourceTag::CoinGecko,
            "page-1",
            1,
            market("bitcoin", "Bitcoin", 50_000.0),
        );
        let normalized = adapter.transform(&[raw.clone()]);

        assert_eq!(normalized.len(), 1);
        let rec = &normalized[0];
        assert_eq!(rec.coin_id, "bitcoin");
        assert_eq!(rec.symbol.as_deref(), Some("BIT"));
        assert_eq!(rec.price_usd, Some(50_000.0));
        assert_eq!(rec.raw_id, raw.id);
        assert_eq!(rec.source, SourceTag::CoinGecko);
    }

    #[tokio::test]
    async fn transform_drops_rows_without_identity() {
        let server = MockServer::start().await;
        let adapter = adapter(
            &server.uri(),
            Arc::new(MemCheckpointStore::default()),
            Arc::new(MemRecordStore::default()),
        );

        let missing_name = RawRecord::new(
            SourceTag::CoinGecko,
            "page-1",
            1,
            json!({"id": "x", "symbol": "x"}),
        );
        assert!(adapter.transform(&[missing_name]).is_empty());
    }
}
