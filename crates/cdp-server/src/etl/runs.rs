//! Run bookkeeping.
//!
//! Every pipeline invocation gets a run row that answers, after the fact:
//! what ran, when, how many records moved, and what went wrong. Runs move
//! `running -> completed | failed` exactly once; the terminal transition is
//! guarded so a finished run can never flip state again.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_common::types::{RunStatus, SourceTag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::etl::error::{EtlError, EtlResult};

/// One pipeline invocation for one source.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub source: SourceTag,
    pub status: RunStatus,
    pub records_processed: i64,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub records_failed: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// Counter deltas accumulated during a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub processed: i64,
    pub inserted: i64,
    pub updated: i64,
    pub failed: i64,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: &RunRecord) -> EtlResult<()>;

    /// Add counter deltas to a run.
    async fn add_counters(&self, run_id: &str, counters: RunCounters) -> EtlResult<()>;

    /// Move a run to a terminal status. Returns false when the run was
    /// already terminal (or unknown) and nothing changed.
    async fn finalize(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> EtlResult<bool>;

    async fn get(&self, run_id: &str) -> EtlResult<Option<RunRecord>>;

    async fn recent(&self, limit: i64) -> EtlResult<Vec<RunRecord>>;
}

/// Owns the run lifecycle on behalf of the orchestrator.
pub struct RunTracker {
    store: Arc<dyn RunStore>,
}

impl RunTracker {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn RunStore> {
        Arc::clone(&self.store)
    }

    /// Open a new run in `running` state and return its id.
    ///
    /// Run ids are `{source}_{yyyymmdd_hhmmss}_{uuid8}`: sortable by start
    /// time within a source, unique across concurrent starts.
    pub async fn start(&self, source: SourceTag) -> EtlResult<String> {
        let started_at = Utc::now();
        let uuid = Uuid::new_v4().simple().to_string();
        let run_id = format!("{}_{}_{}", source, started_at.format("%Y%m%d_%H%M%S"), &uuid[..8]);

        let run = RunRecord {
            run_id: run_id.clone(),
            source,
            status: RunStatus::Running,
            records_processed: 0,
            records_inserted: 0,
            records_updated: 0,
            records_failed: 0,
            started_at,
            ended_at: None,
            duration_seconds: None,
            error_message: None,
        };
        self.store.create(&run).await?;

        info!(run_id, %source, "run started");
        Ok(run_id)
    }

    pub async fn update_counters(&self, run_id: &str, counters: RunCounters) -> EtlResult<()> {
        self.store.add_counters(run_id, counters).await
    }

    /// Close the run. Double completion is a bug in the caller: it is logged
    /// and surfaced as a fatal error, and the stored run keeps its first
    /// terminal state.
    pub async fn complete(
        &self,
        run_id: &str,
        success: bool,
        error_message: Option<String>,
    ) -> EtlResult<()> {
        let status = if success { RunStatus::Completed } else { RunStatus::Failed };
        let ended_at = Utc::now();

        let transitioned = self
            .store
            .finalize(run_id, status, ended_at, error_message.as_deref())
            .await?;

        if !transitioned {
            error!(run_id, %status, "attempted to finalize a run that is not running");
            return Err(EtlError::fatal(format!(
                "run {run_id} is not running; refusing to finalize as {status}"
            )));
        }

        info!(run_id, %status, "run finished");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    source: String,
    status: String,
    records_processed: i64,
    records_inserted: i64,
    records_updated: i64,
    records_failed: i64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<f64>,
    error_message: Option<String>,
}

impl RunRow {
    fn into_record(self) -> EtlResult<RunRecord> {
        let source = SourceTag::from_str(&self.source)
            .map_err(|e| EtlError::validation(e.to_string()))?;
        let status = RunStatus::from_str(&self.status)
            .map_err(|e| EtlError::validation(e.to_string()))?;
        Ok(RunRecord {
            run_id: self.run_id,
            source,
            status,
            records_processed: self.records_processed,
            records_inserted: self.records_inserted,
            records_updated: self.records_updated,
            records_failed: self.records_failed,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_seconds: self.duration_seconds,
            error_message: self.error_message,
        })
    }
}

const RUN_COLUMNS: &str = "run_id, source, status, records_processed, records_inserted, \
     records_updated, records_failed, started_at, ended_at, duration_seconds, error_message";

/// Postgres-backed run store.
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create(&self, run: &RunRecord) -> EtlResult<()> {
        sqlx::query(
            "INSERT INTO etl_runs (run_id, source, status, started_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&run.run_id)
        .bind(run.source.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_counters(&self, run_id: &str, counters: RunCounters) -> EtlResult<()> {
        sqlx::query(
            "UPDATE etl_runs SET \
                 records_processed = records_processed + $2, \
                 records_inserted = records_inserted + $3, \
                 records_updated = records_updated + $4, \
                 records_failed = records_failed + $5 \
             WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(counters.processed)
        .bind(counters.inserted)
        .bind(counters.updated)
        .bind(counters.failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        run_id: &str,
        status: RunStatus,
        ended_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> EtlResult<bool> {
        // The status guard makes the terminal transition atomic: whichever
        // caller lands first wins, everyone else matches zero rows.
        let result = sqlx::query(
            "UPDATE etl_runs SET \
                 status = $2, \
                 ended_at = $3, \
                 duration_seconds = EXTRACT(EPOCH FROM ($3 - started_at)), \
                 error_message = $4 \
             WHERE run_id = $1 AND status = 'running'",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(ended_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, run_id: &str) -> EtlResult<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM etl_runs WHERE run_id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::into_record).transpose()
    }

    async fn recent(&self, limit: i64) -> EtlResult<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM etl_runs ORDER BY started_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunRow::into_record).collect()
    }
}
