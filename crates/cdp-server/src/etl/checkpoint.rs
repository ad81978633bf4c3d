//! Checkpoint persistence.
//!
//! A checkpoint is one `(source, kind)` cell with an opaque string value;
//! the adapter that owns the checkpoint decides what the value means (page
//! number, RFC 3339 timestamp). Writes replace atomically via upsert.

use std::str::FromStr;

use async_trait::async_trait;
use cdp_common::types::{CheckpointKind, SourceTag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::etl::error::{EtlError, EtlResult};

/// A stored resume point for one source.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub source: SourceTag,
    pub kind: CheckpointKind,
    pub value: String,
    pub metadata: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, source: SourceTag, kind: CheckpointKind) -> EtlResult<Option<Checkpoint>>;

    /// Upsert the checkpoint cell for `(source, kind)`.
    async fn set(
        &self,
        source: SourceTag,
        kind: CheckpointKind,
        value: &str,
        metadata: Option<Value>,
    ) -> EtlResult<()>;

    async fn list(&self, source: Option<SourceTag>) -> EtlResult<Vec<Checkpoint>>;

    /// Delete all checkpoints for a source; returns how many were removed.
    /// The next run starts from scratch.
    async fn clear(&self, source: SourceTag) -> EtlResult<u64>;
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    source: String,
    checkpoint_kind: String,
    checkpoint_value: String,
    metadata: Option<Value>,
    updated_at: DateTime<Utc>,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> EtlResult<Checkpoint> {
        let source = SourceTag::from_str(&self.source)
            .map_err(|e| EtlError::validation(e.to_string()))?;
        let kind = CheckpointKind::from_str(&self.checkpoint_kind)
            .map_err(|e| EtlError::validation(e.to_string()))?;
        Ok(Checkpoint {
            source,
            kind,
            value: self.checkpoint_value,
            metadata: self.metadata,
            updated_at: self.updated_at,
        })
    }
}

/// Postgres-backed checkpoint store.
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(&self, source: SourceTag, kind: CheckpointKind) -> EtlResult<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT source, checkpoint_kind, checkpoint_value, metadata, updated_at \
             FROM etl_checkpoints WHERE source = $1 AND checkpoint_kind = $2",
        )
        .bind(source.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    async fn set(
        &self,
        source: SourceTag,
        kind: CheckpointKind,
        value: &str,
        metadata: Option<Value>,
    ) -> EtlResult<()> {
        sqlx::query(
            "INSERT INTO etl_checkpoints (source, checkpoint_kind, checkpoint_value, metadata, updated_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (source, checkpoint_kind) DO UPDATE SET \
                 checkpoint_value = EXCLUDED.checkpoint_value, \
                 metadata = EXCLUDED.metadata, \
                 updated_at = NOW()",
        )
        .bind(source.as_str())
        .bind(kind.as_str())
        .bind(value)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        debug!(%source, %kind, value, "checkpoint saved");
        Ok(())
    }

    async fn list(&self, source: Option<SourceTag>) -> EtlResult<Vec<Checkpoint>> {
        let rows = match source {
            Some(source) => {
                sqlx::query_as::<_, CheckpointRow>(
                    "SELECT source, checkpoint_kind, checkpoint_value, metadata, updated_at \
                     FROM etl_checkpoints WHERE source = $1 ORDER BY checkpoint_kind",
                )
                .bind(source.as_str())
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, CheckpointRow>(
                    "SELECT source, checkpoint_kind, checkpoint_value, metadata, updated_at \
                     FROM etl_checkpoints ORDER BY source, checkpoint_kind",
                )
                .fetch_all(&self.pool)
                .await?
            },
        };

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }

    async fn clear(&self, source: SourceTag) -> EtlResult<u64> {
        let result = sqlx::query("DELETE FROM etl_checkpoints WHERE source = $1")
            .bind(source.as_str())
            .execute(&self.pool)
            .await?;

        debug!(%source, removed = result.rows_affected(), "checkpoints cleared");
        Ok(result.rows_affected())
    }
}
