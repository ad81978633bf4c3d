//! Incremental market-data ETL engine.
//!
//! Each upstream source (CoinGecko, CoinPaprika, a CSV drop directory) is an
//! adapter behind [`sources::SourceAdapter`]. The [`orchestrator::EtlOrchestrator`]
//! runs extract -> transform -> load per source, with checkpoints so repeated
//! sweeps only pick up new work, and a run ledger for observability.

pub mod checkpoint;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod runs;
pub mod sources;
pub mod store;

use std::sync::Arc;

use sqlx::PgPool;

pub use checkpoint::{Checkpoint, CheckpointStore, PgCheckpointStore};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::EtlConfig;
pub use error::{EtlError, EtlResult};
pub use models::{NormalizedRecord, RawRecord};
pub use orchestrator::{EtlOrchestrator, RunResult};
pub use runs::{PgRunStore, RunRecord, RunStore, RunTracker};
pub use sources::{CoinGeckoAdapter, CoinPaprikaAdapter, CsvAdapter, SourceRegistry};
pub use store::{PgRecordStore, RecordStore};

/// Wire the three source adapters against the given stores.
pub fn build_registry(
    config: &EtlConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    records: Arc<dyn RecordStore>,
) -> EtlResult<SourceRegistry> {
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(CoinGeckoAdapter::new(
        config.coingecko.clone(),
        &config.rate_limit,
        Arc::clone(&checkpoints),
        Arc::clone(&records),
    )?));
    registry.register(Arc::new(CoinPaprikaAdapter::new(
        config.coinpaprika.clone(),
        &config.rate_limit,
        Arc::clone(&checkpoints),
        Arc::clone(&records),
    )?));
    registry.register(Arc::new(CsvAdapter::new(
        config.csv.clone(),
        checkpoints,
        records,
    )));
    Ok(registry)
}

/// Build a fully wired orchestrator backed by Postgres stores.
pub fn build_orchestrator(config: &EtlConfig, pool: PgPool) -> EtlResult<EtlOrchestrator> {
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(PgCheckpointStore::new(pool.clone()));
    let records: Arc<dyn RecordStore> =
        Arc::new(PgRecordStore::new(pool.clone(), config.batch_size));
    let runs: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool));

    let registry = build_registry(config, checkpoints, records)?;
    Ok(EtlOrchestrator::new(registry, RunTracker::new(runs)))
}
