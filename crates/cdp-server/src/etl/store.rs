//! Record persistence.
//!
//! Raw payloads are written in batches (append-only); normalized records are
//! written one at a time so a single bad record can be skipped and counted
//! without giving up the batch.

use std::collections::HashSet;

use async_trait::async_trait;
use cdp_common::types::SourceTag;
use sqlx::{PgPool, QueryBuilder};
use tracing::{debug, warn};

use crate::etl::error::{EtlError, EtlResult};
use crate::etl::models::{NormalizedRecord, RawRecord};

/// Result of the load stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Records written to normalized storage.
    pub loaded: usize,
    /// Records skipped with a validation failure.
    pub failed: usize,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append raw payloads. All-or-nothing per call.
    async fn insert_raw(&self, records: &[RawRecord]) -> EtlResult<()>;

    /// Write one normalized record. Returns [`EtlError::Validation`] for a
    /// record that fails the validity bar, [`EtlError::Storage`] when the
    /// database write itself fails.
    async fn insert_normalized(&self, record: &NormalizedRecord) -> EtlResult<()>;

    /// Distinct origins already present in raw storage for a source. This is
    /// the dedup set for file-based extraction.
    async fn ingested_origins(&self, source: SourceTag) -> EtlResult<HashSet<String>>;
}

/// Shared load stage: write records one by one, absorbing validation
/// failures into the failed count and propagating storage failures.
pub async fn load_records(
    store: &dyn RecordStore,
    records: &[NormalizedRecord],
) -> EtlResult<LoadOutcome> {
    let mut outcome = LoadOutcome::default();

    for record in records {
        match store.insert_normalized(record).await {
            Ok(()) => outcome.loaded += 1,
            Err(EtlError::Validation(reason)) => {
                warn!(coin_id = %record.coin_id, %reason, "skipping invalid record");
                outcome.failed += 1;
            },
            Err(err) => return Err(err),
        }
    }

    Ok(outcome)
}

/// Postgres-backed record store.
pub struct PgRecordStore {
    pool: PgPool,
    batch_size: usize,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_raw(&self, records: &[RawRecord]) -> EtlResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        for chunk in records.chunks(self.batch_size) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO raw_records (id, source, origin, position, payload, ingested_at) ",
            );
            builder.push_values(chunk, |mut b, record| {
                b.push_bind(record.id)
                    .push_bind(record.source.as_str())
                    .push_bind(&record.origin)
                    .push_bind(record.position)
                    .push_bind(&record.payload)
                    .push_bind(record.ingested_at);
            });
            builder.build().execute(&self.pool).await?;
        }

        debug!(count = records.len(), "raw records stored");
        Ok(())
    }

    async fn insert_normalized(&self, record: &NormalizedRecord) -> EtlResult<()> {
        if !record.is_valid() {
            return Err(EtlError::validation(format!(
                "record {} is missing coin_id or name",
                record.id
            )));
        }

        sqlx::query(
            "INSERT INTO normalized_records \
                 (id, coin_id, name, symbol, price_usd, market_cap_usd, volume_24h_usd, \
                  rank, percent_change_24h, source, raw_id, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(record.id)
        .bind(&record.coin_id)
        .bind(&record.name)
        .bind(&record.symbol)
        .bind(record.price_usd)
        .bind(record.market_cap_usd)
        .bind(record.volume_24h_usd)
        .bind(record.rank)
        .bind(record.percent_change_24h)
        .bind(record.source.as_str())
        .bind(record.raw_id)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ingested_origins(&self, source: SourceTag) -> EtlResult<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT origin FROM raw_records WHERE source = $1")
                .bind(source.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(origin,)| origin).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::memory::MemRecordStore;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn record(coin_id: &str, name: &str) -> NormalizedRecord {
        NormalizedRecord {
            id: Uuid::new_v4(),
            coin_id: coin_id.to_string(),
            name: name.to_string(),
            symbol: Some("BTC".to_string()),
            price_usd: Some(50_000.0),
            market_cap_usd: None,
            volume_24h_usd: None,
            rank: Some(1),
            percent_change_24h: None,
            source: SourceTag::CoinGecko,
            raw_id: Uuid::new_v4(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn load_counts_valid_and_invalid() {
        let store = MemRecordStore::default();
        let records = vec![record("bitcoin", "Bitcoin"), record("", "Nameless"), record("eth", "Ethereum")];

        let outcome = load_records(&store, &records).await.unwrap();
        assert_eq!(outcome, LoadOutcome { loaded: 2, failed: 1 });
        assert_eq!(store.normalized().len(), 2);
    }

    #[tokio::test]
    async fn origins_track_raw_inserts() {
        let store = MemRecordStore::default();
        let raws = vec![
            RawRecord::new(SourceTag::Csv, "a.csv", 1, json!({"id": "btc"})),
            RawRecord::new(SourceTag::Csv, "a.csv", 2, json!({"id": "eth"})),
            RawRecord::new(SourceTag::Csv, "b.csv", 1, json!({"id": "sol"})),
            RawRecord::new(SourceTag::CoinGecko, "page-1", 1, json!({"id": "ada"})),
        ];
        store.insert_raw(&raws).await.unwrap();

        let origins = store.ingested_origins(SourceTag::Csv).await.unwrap();
        assert_eq!(origins.len(), 2);
        assert!(origins.contains("a.csv"));
        assert!(!origins.contains("page-1"));
    }
}
