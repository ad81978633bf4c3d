//! End-to-end pipeline scenarios against mocked upstreams and in-memory
//! stores: checkpoint resume, retry exhaustion, per-source isolation and
//! CSV dedup across sweeps.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cdp_common::types::{CheckpointKind, RunStatus, SourceTag};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cdp_server::etl::checkpoint::CheckpointStore;
use cdp_server::etl::config::{CoinGeckoConfig, CoinPaprikaConfig, CsvSourceConfig};
use cdp_server::etl::memory::{MemCheckpointStore, MemRecordStore, MemRunStore};
use cdp_server::etl::rate_limiter::RateLimitConfig;
use cdp_server::etl::runs::{RunStore, RunTracker};
use cdp_server::etl::sources::{
    CoinGeckoAdapter, CoinPaprikaAdapter, CsvAdapter, SourceAdapter, SourceRegistry,
};
use cdp_server::etl::EtlOrchestrator;

struct Harness {
    checkpoints: Arc<MemCheckpointStore>,
    records: Arc<MemRecordStore>,
    runs: Arc<MemRunStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            checkpoints: Arc::new(MemCheckpointStore::default()),
            records: Arc::new(MemRecordStore::default()),
            runs: Arc::new(MemRunStore::default()),
        }
    }

    fn limits() -> RateLimitConfig {
        RateLimitConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RateLimitConfig::default()
        }
    }

    fn coingecko(&self, base_url: &str) -> CoinGeckoAdapter {
        let config = CoinGeckoConfig {
            base_url: base_url.to_string(),
            ..CoinGeckoConfig::default()
        };
        CoinGeckoAdapter::new(
            config,
            &Self::limits(),
            self.checkpoints.clone(),
            self.records.clone(),
        )
        .unwrap()
    }

    fn coinpaprika(&self, base_url: &str) -> CoinPaprikaAdapter {
        let config = CoinPaprikaConfig {
            base_url: base_url.to_string(),
            ..CoinPaprikaConfig::default()
        };
        CoinPaprikaAdapter::new(
            config,
            &Self::limits(),
            self.checkpoints.clone(),
            self.records.clone(),
        )
        .unwrap()
    }

    fn csv(&self, directory: &Path) -> CsvAdapter {
        CsvAdapter::new(
            CsvSourceConfig {
                directory: directory.to_path_buf(),
            },
            self.checkpoints.clone(),
            self.records.clone(),
        )
    }

    fn orchestrator(&self, adapters: Vec<Arc<dyn SourceAdapter>>) -> EtlOrchestrator {
        let mut registry = SourceRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let runs: Arc<dyn RunStore> = self.runs.clone();
        EtlOrchestrator::new(registry, RunTracker::new(runs))
    }
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
        "price_change_percentage_24h": 0.5,
    })
}

fn ticker(id: &str, name: &str, price: f64) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "symbol": id.chars().take(3).collect::<String>().to_uppercase(),
        "rank": 1,
        "quotes": { "USD": {
            "price": price,
            "volume_24h": price * 1e4,
            "market_cap": price * 1e6,
            "percent_change_24h": -0.3,
        }},
    })
}

#[tokio::test]
async fn csv_sweeps_ingest_each_file_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("coins.csv"),
        "id,name,price\nbitcoin,Bitcoin,50000\neth,Ethereum,3000\n",
    )
    .unwrap();

    let harness = Harness::new();
    let orchestrator = harness.orchestrator(vec![Arc::new(harness.csv(dir.path()))]);

    let first = orchestrator.run_source(SourceTag::Csv).await;
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.records_processed, 2);
    assert_eq!(first.records_loaded, 2);
    assert_eq!(harness.records.raw().len(), 2);

    // Second sweep over the same directory finds nothing new.
    let second = orchestrator.run_source(SourceTag::Csv).await;
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.records_processed, 0);
    assert_eq!(harness.records.raw().len(), 2);

    // A new drop is picked up without re-ingesting the old file.
    std::fs::write(
        dir.path().join("more-coins.csv"),
        "id,name,price\nsolana,Solana,150\n",
    )
    .unwrap();
    let third = orchestrator.run_source(SourceTag::Csv).await;
    assert_eq!(third.status, RunStatus::Completed);
    assert_eq!(third.records_processed, 1);
    assert_eq!(harness.records.raw().len(), 3);

    // Every run reached a terminal state in the ledger.
    let runs = harness.runs.recent(10).await.unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
}

#[tokio::test]
async fn transient_rate_limiting_recovers_within_the_retry_budget() {
    let server = MockServer::start().await;
    // Two 429s, then the page arrives.
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([market("bitcoin", "Bitcoin", 50_000.0)])),
        )
        .mount(&server)
        .await;

    let harness = Harness::new();
    let orchestrator = harness.orchestrator(vec![Arc::new(harness.coingecko(&server.uri()))]);

    let result = orchestrator.run_source(SourceTag::CoinGecko).await;
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.records_loaded, 1);

    let cp = harness
        .checkpoints
        .get(SourceTag::CoinGecko, CheckpointKind::Page)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cp.value, "1");
}

#[tokio::test]
async fn exhausted_retries_fail_the_run_and_keep_the_checkpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness
        .checkpoints
        .set(SourceTag::CoinGecko, CheckpointKind::Page, "5", None)
        .await
        .unwrap();
    let orchestrator = harness.orchestrator(vec![Arc::new(harness.coingecko(&server.uri()))]);

    let result = orchestrator.run_source(SourceTag::CoinGecko).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("retries exhausted"));

    // The failed run must re-fetch the same page next time.
    let cp = harness
        .checkpoints
        .get(SourceTag::CoinGecko, CheckpointKind::Page)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cp.value, "5");

    let run = harness
        .runs
        .get(result.run_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.is_some());
}

#[tokio::test]
async fn paprika_checkpoint_is_advisory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tickers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            ticker("btc-bitcoin", "Bitcoin", 50_000.0),
            ticker("eth-ethereum", "Ethereum", 3_000.0),
        ])))
        .mount(&server)
        .await;

    let harness = Harness::new();
    // A snapshot taken years ago must not shrink the next fetch.
    harness
        .checkpoints
        .set(
            SourceTag::CoinPaprika,
            CheckpointKind::Timestamp,
            "2020-01-01T00:00:00+00:00",
            None,
        )
        .await
        .unwrap();
    let orchestrator = harness.orchestrator(vec![Arc::new(harness.coinpaprika(&server.uri()))]);

    let result = orchestrator.run_source(SourceTag::CoinPaprika).await;
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.records_processed, 2);
    assert_eq!(result.records_loaded, 2);

    let cp = harness
        .checkpoints
        .get(SourceTag::CoinPaprika, CheckpointKind::Timestamp)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(cp.value, "2020-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn one_failing_source_leaves_the_others_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("drop.csv"), "id,name\nbitcoin,Bitcoin\n").unwrap();

    let harness = Harness::new();
    let orchestrator = harness.orchestrator(vec![
        Arc::new(harness.coingecko(&server.uri())),
        Arc::new(harness.csv(dir.path())),
    ]);

    let results = orchestrator.run_all().await;
    assert_eq!(results[&SourceTag::CoinGecko].status, RunStatus::Failed);
    assert_eq!(results[&SourceTag::Csv].status, RunStatus::Completed);
    assert_eq!(results[&SourceTag::Csv].records_loaded, 1);

    for result in results.values() {
        let run = harness
            .runs
            .get(result.run_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(run.status.is_terminal());
    }
}

#[tokio::test]
async fn storage_failure_during_load_fails_the_run_but_keeps_raw_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/markets"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([market("bitcoin", "Bitcoin", 50_000.0)])),
        )
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness.records.set_fail_normalized(true);
    let orchestrator = harness.orchestrator(vec![Arc::new(harness.coingecko(&server.uri()))]);

    let result = orchestrator.run_source(SourceTag::CoinGecko).await;
    assert_eq!(result.status, RunStatus::Failed);

    // Extraction persisted before the load stage broke: the page is safely
    // in raw storage and visible for reprocessing.
    assert_eq!(harness.records.raw().len(), 1);
    assert!(harness.records.normalized().is_empty());
}
