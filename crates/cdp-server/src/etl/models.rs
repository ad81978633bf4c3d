//! Record types flowing through the pipeline.

use chrono::{DateTime, Utc};
use cdp_common::types::SourceTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A raw payload exactly as extracted from a source.
///
/// The payload is opaque JSON: extraction never interprets upstream shapes,
/// so schema drift upstream cannot fail the extract stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Uuid,
    pub source: SourceTag,
    /// Where inside the source this payload came from: a page descriptor for
    /// REST sources, the filename for file sources.
    pub origin: String,
    /// 1-based position within the origin (row number, index in page).
    pub position: i32,
    pub payload: Value,
    pub ingested_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(source: SourceTag, origin: impl Into<String>, position: i32, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            origin: origin.into(),
            position,
            payload,
            ingested_at: Utc::now(),
        }
    }
}

/// A market data record in the unified schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: Uuid,
    pub coin_id: String,
    pub name: String,
    /// Ticker symbol, uppercased.
    pub symbol: Option<String>,
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub rank: Option<i32>,
    pub percent_change_24h: Option<f64>,
    pub source: SourceTag,
    pub raw_id: Uuid,
    pub processed_at: DateTime<Utc>,
}

impl NormalizedRecord {
    /// Minimum bar for a record to enter normalized storage. Numeric fields
    /// may all be absent; identity may not.
    pub fn is_valid(&self) -> bool {
        !self.coin_id.trim().is_empty() && !self.name.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(coin_id: &str, name: &str) -> NormalizedRecord {
        let raw = RawRecord::new(SourceTag::Csv, "coins.csv", 1, json!({}));
        NormalizedRecord {
            id: Uuid::new_v4(),
            coin_id: coin_id.to_string(),
            name: name.to_string(),
            symbol: None,
            price_usd: None,
            market_cap_usd: None,
            volume_24h_usd: None,
            rank: None,
            percent_change_24h: None,
            source: SourceTag::Csv,
            raw_id: raw.id,
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn validity_requires_identity_only() {
        assert!(record("bitcoin", "Bitcoin").is_valid());
        assert!(!record("", "Bitcoin").is_valid());
        assert!(!record("bitcoin", "  ").is_valid());
    }
}
