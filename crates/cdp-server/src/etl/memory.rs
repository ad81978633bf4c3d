//! In-memory store implementations.
//!
//! These back the pipeline in tests and local experiments where no Postgres
//! is available. They follow the same contracts as the Pg stores, including
//! the guarded terminal transition on runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cdp_common::types::{CheckpointKind, RunStatus, SourceTag};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::etl::checkpoint::{Checkpoint, CheckpointStore};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::models::{NormalizedRecord, RawRecord};
use crate::etl::runs::{RunCounters, RunRecord, RunStore};
use crate::etl::store::RecordStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`CheckpointStore`].
#[derive(Default)]
pub struct MemCheckpointStore {
    cells: Mutex<HashMap<(SourceTag, CheckpointKind), Checkpoint>>,
}

#[async_trait]
impl CheckpointStore for MemCheckpointStore {
    async fn get(&self, source: SourceTag, kind: CheckpointKind) -> EtlResult<Option<Checkpoint>> {
        Ok(lock(&self.cells).get(&(source, kind)).cloned())
    }

    async fn set(
        &self,
        source: SourceTag,
        kind: CheckpointKind,
        value: &str,
        metadata: Option<Value>,
    ) -> EtlResult<()> {
        lock(&self.cells).insert(
            (source, kind),
            Checkpoint {
                source,
                kind,
                value: value.to_string(),
                metadata,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self, source: Option<SourceTag>) -> EtlResult<Vec<Checkpoint>> {
        let cells = lock(&self.cells);
        let mut checkpoints: Vec<Checkpoint> = cells
            .values()
            .filter(|c| source.map(|s| c.source == s).unwrap_or(true))
            .cloned()
            .collect();
        checkpoints.sort_by_key(|c| (c.source, c.kind));
        Ok(checkpoints)
    }

    async fn clear(&self, source: SourceTag) -> EtlResult<u64> {
        let mut cells = lock(&self.cells);
        let before = cells.len();
        cells.retain(|(s, _), _| *s != source);
        Ok((before - cells.len()) as u64)
    }
}

/// In-memory [`RunStore`].
#[derive(Default)]
pub struct MemRunStore {
    runs: Mutex<HashMap<String, RunRecord>>,
}

#[async_trait]
impl RunStore for MemRunStore {
    async fn create(&self, run: &RunRecord) -> EtlResult<()> {
        let mut runs = lock(&self.runs);
        if runs.contains_key(&run.run_id) {
            return Err(EtlError::fatal(format!("duplicate run id {}", run.run_id)));
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn add_counters(&self, run_id: &str, counters: RunCounters) -> EtlResult<()> {
        let mut runs = lock(&self.runs);
        if let Some(run) = runs.get_mut(run_id) {
            run.records_processed += counters.processed;
            run.records_inserted += counters.inserted;
            run.records_updated += counters.updated;
            run.records_failed += counters.failed;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> EtlResult<bool> {
        let mut runs = lock(&self.runs);
        let Some(run) = runs.get_mut(run_id) else {
            return Ok(false);
        };
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = status;
        run.ended_at = Some(ended_at);
        run.duration_seconds = Some((ended_at - run.started_at).as_seconds_f64());
        run.error_message = error_message.map(str::to_string);
        Ok(true)
    }

    async fn get(&self, run_id: &str) -> EtlResult<Option<RunRecord>> {
        Ok(lock(&self.runs).get(run_id).cloned())
    }

    async fn recent(&self, limit: i64) -> EtlResult<Vec<RunRecord>> {
        let runs = lock(&self.runs);
        let mut records: Vec<RunRecord> = runs.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

/// In-memory [`RecordStore`] with an optional storage-failure switch for
/// exercising the propagation path.
#[derive(Default)]
pub struct MemRecordStore {
    raw: Mutex<Vec<RawRecord>>,
    normalized: Mutex<Vec<NormalizedRecord>>,
    fail_normalized: AtomicBool,
}

impl MemRecordStore {
    /// Make every subsequent normalized insert fail with a storage error.
    pub fn set_fail_normalized(&self, fail: bool) {
        self.fail_normalized.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self) -> Vec<RawRecord> {
        lock(&self.raw).clone()
    }

    pub fn normalized(&self) -> Vec<NormalizedRecord> {
        lock(&self.normalized).clone()
    }
}

#[async_trait]
impl RecordStore for MemRecordStore {
    async fn insert_raw(&self, records: &[RawRecord]) -> EtlResult<()> {
        lock(&self.raw).extend_from_slice(records);
        Ok(())
    }

    async fn insert_normalized(&self, record: &NormalizedRecord) -> EtlResult<()> {
        if self.fail_normalized.load(Ordering::SeqCst) {
            return Err(EtlError::Storage(sqlx::Error::Protocol(
                "simulated storage failure".into(),
            )));
        }
        if !record.is_valid() {
            return Err(EtlError::validation(format!(
                "record {} is missing coin_id or name",
                record.id
            )));
        }
        lock(&self.normalized).push(record.clone());
        Ok(())
    }

    async fn ingested_origins(&self, source: SourceTag) -> EtlResult<HashSet<String>> {
        Ok(lock(&self.raw)
            .iter()
            .filter(|r| r.source == source)
            .map(|r| r.origin.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_upsert_replaces_value() {
        let store = MemCheckpointStore::default();
        store
            .set(SourceTag::CoinGecko, CheckpointKind::Page, "1", None)
            .await
            .unwrap();
        store
            .set(SourceTag::CoinGecko, CheckpointKind::Page, "2", None)
            .await
            .unwrap();

        let cp = store
            .get(SourceTag::CoinGecko, CheckpointKind::Page)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.value, "2");
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_only_touches_one_source() {
        let store = MemCheckpointStore::default();
        store.set(SourceTag::CoinGecko, CheckpointKind::Page, "3", None).await.unwrap();
        store.set(SourceTag::Csv, CheckpointKind::LastProcessed, "t", None).await.unwrap();

        assert_eq!(store.clear(SourceTag::CoinGecko).await.unwrap(), 1);
        assert!(store.get(SourceTag::CoinGecko, CheckpointKind::Page).await.unwrap().is_none());
        assert!(store.get(SourceTag::Csv, CheckpointKind::LastProcessed).await.unwrap().is_some());
    }
}
