//! CSV drop-directory adapter.
//!
//! Scans a local directory for `.csv` / `.tsv` files and ingests each file
//! exactly once: the dedup key is the filename, checked against the distinct
//! origins already in raw storage. Rows become flat JSON objects keyed by
//! header, with empty cells as null; all interpretation of cell contents
//! (numeric cleaning, column mapping) happens in the transform stage.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_common::types::{CheckpointKind, SourceTag};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::etl::checkpoint::CheckpointStore;
use crate::etl::config::CsvSourceConfig;
use crate::etl::error::EtlResult;
use crate::etl::models::{NormalizedRecord, RawRecord};
use crate::etl::sources::SourceAdapter;
use crate::etl::store::{load_records, LoadOutcome, RecordStore};

/// Column name priority lists for mapping arbitrary headers onto the unified
/// schema. First case-insensitive match with a non-null value wins.
const ID_COLUMNS: &[&str] = &["id", "coin_id", "symbol", "ticker"];
const NAME_COLUMNS: &[&str] = &["name", "coin_name", "currency_name"];
const SYMBOL_COLUMNS: &[&str] = &["symbol", "ticker", "code"];
const PRICE_COLUMNS: &[&str] = &["price", "price_usd", "current_price", "value"];
const MARKET_CAP_COLUMNS: &[&str] = &["market_cap", "market_cap_usd", "mcap"];
const VOLUME_COLUMNS: &[&str] = &["volume", "volume_24h", "daily_volume"];
const RANK_COLUMNS: &[&str] = &["rank", "market_cap_rank", "position"];
const CHANGE_COLUMNS: &[&str] = &["change_24h", "percent_change_24h", "daily_change"];

pub struct CsvAdapter {
    config: CsvSourceConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    records: Arc<dyn RecordStore>,
}

impl CsvAdapter {
    pub fn new(
        config: CsvSourceConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config,
            checkpoints,
            records,
        }
    }

    async fn candidate_files(&self) -> EtlResult<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_tabular = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("tsv"))
                .unwrap_or(false);
            if !is_tabular {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push((name.to_string(), path.clone()));
            }
        }
        // Deterministic ingestion order.
        files.sort();
        Ok(files)
    }
}

/// Parse one file's contents into raw records, one JSON object per row.
/// Unreadable rows are skipped and logged; a broken header fails the file.
fn parse_file(filename: &str, contents: &str) -> Result<Vec<RawRecord>, csv::Error> {
    let delimiter = if filename.to_lowercase().ends_with(".tsv") {
        b'\t'
    } else {
        b','
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        match row {
            Ok(row) => {
                let mut payload = Map::new();
                for (header, field) in headers.iter().zip(row.iter()) {
                    let value = if field.is_empty() {
                        Value::Null
                    } else {
                        Value::String(field.to_string())
                    };
                    payload.insert(header.to_string(), value);
                }
                records.push(RawRecord::new(
                    SourceTag::Csv,
                    filename,
                    idx as i32 + 1,
                    Value::Object(payload),
                ));
            },
            Err(err) => warn!(file = filename, row = idx + 1, %err, "skipping unreadable row"),
        }
    }
    Ok(records)
}

/// First non-null value under any of the candidate column names.
fn lookup<'a>(payload: &'a Map<String, Value>, columns: &[&str]) -> Option<&'a Value> {
    for column in columns {
        for (key, value) in payload {
            if key.eq_ignore_ascii_case(column) && !value.is_null() {
                return Some(value);
            }
        }
    }
    None
}

fn text_field(payload: &Map<String, Value>, columns: &[&str]) -> Option<String> {
    lookup(payload, columns).and_then(|value| match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Strip formatting characters from a numeric cell and filter the usual
/// not-a-value spellings.
fn clean_numeric(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%'))
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.to_lowercase().as_str() {
        "n/a" | "na" | "null" | "none" | "-" => None,
        _ => Some(cleaned),
    }
}

fn f64_field(payload: &Map<String, Value>, columns: &[&str]) -> Option<f64> {
    lookup(payload, columns).and_then(|value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => clean_numeric(s).and_then(|c| c.parse().ok()),
        _ => None,
    })
}

fn i32_field(payload: &Map<String, Value>, columns: &[&str]) -> Option<i32> {
    f64_field(payload, columns).map(|f| f as i32)
}

#[async_trait]
impl SourceAdapter for CsvAdapter {
    fn source(&self) -> SourceTag {
        SourceTag::Csv
    }

    async fn extract(&self) -> EtlResult<Vec<RawRecord>> {
        if !self.config.directory.exists() {
            warn!(directory = %self.config.directory.display(), "csv directory does not exist");
            return Ok(Vec::new());
        }

        let already_ingested: HashSet<String> =
            self.records.ingested_origins(SourceTag::Csv).await?;

        let mut raws = Vec::new();
        let mut files_processed = 0usize;
        for (filename, path) in self.candidate_files().await? {
            if already_ingested.contains(&filename) {
                debug!(file = %filename, "already ingested, skipping");
                continue;
            }

            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(file = %filename, %err, "failed to read file, skipping");
                    continue;
                },
            };
            match parse_file(&filename, &contents) {
                Ok(records) => {
                    info!(file = %filename, rows = records.len(), "file parsed");
                    raws.extend(records);
                    files_processed += 1;
                },
                Err(err) => warn!(file = %filename, %err, "failed to parse file, skipping"),
            }
        }

        if raws.is_empty() {
            info!("no new csv files");
            return Ok(raws);
        }

        self.records.insert_raw(&raws).await?;
        self.checkpoints
            .set(
                SourceTag::Csv,
                CheckpointKind::LastProcessed,
                &Utc::now().to_rfc3339(),
                Some(json!({ "files_processed": files_processed, "records_extracted": raws.len() })),
            )
            .await?;

        info!(files = files_processed, records = raws.len(), "directory sweep finished");
        Ok(raws)
    }

    fn transform(&self, raw: &[RawRecord]) -> Vec<NormalizedRecord> {
        raw.iter()
            .filter_map(|record| {
                let Some(payload) = record.payload.as_object() else {
                    warn!(origin = %record.origin, position = record.position,
                        "dropping non-object payload");
                    return None;
                };

                let coin_id = text_field(payload, ID_COLUMNS);
                let name = text_field(payload, NAME_COLUMNS);
                let (Some(coin_id), Some(name)) = (coin_id, name) else {
                    warn!(origin = %record.origin, position = record.position,
                        "dropping row without identity columns");
                    return None;
                };

                Some(NormalizedRecord {
                    id: Uuid::new_v4(),
                    coin_id,
                    name,
                    symbol: text_field(payload, SYMBOL_COLUMNS).map(|s| s.to_uppercase()),
                    price_usd: f64_field(payload, PRICE_COLUMNS),
                    market_cap_usd: f64_field(payload, MARKET_CAP_COLUMNS),
                    volume_24h_usd: f64_field(payload, VOLUME_COLUMNS),
                    rank: i32_field(payload, RANK_COLUMNS),
                    percent_change_24h: f64_field(payload, CHANGE_COLUMNS),
                    source: SourceTag::Csv,
                    raw_id: record.id,
                    processed_at: Utc::now(),
                })
            })
            .collect()
    }

    async fn load(&self, records: &[NormalizedRecord]) -> EtlResult<LoadOutcome> {
        load_records(self.records.as_ref(), records).await
    }
}
