//! Common types used across CDP
//!
//! The enums here are the shared vocabulary between the ETL engine, the
//! database layer, and the HTTP API. They all round-trip through the lowercase
//! string forms stored in Postgres.

use serde::{Deserialize, Serialize};

use crate::error::CdpError;

/// Identifies a configured data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// CoinGecko markets API (page-based incremental extraction)
    CoinGecko,
    /// CoinPaprika tickers API (full snapshot per run)
    CoinPaprika,
    /// Local CSV/TSV drop directory
    Csv,
}

impl SourceTag {
    /// All sources in their canonical run order.
    pub const ALL: [SourceTag; 3] = [SourceTag::CoinGecko, SourceTag::CoinPaprika, SourceTag::Csv];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::CoinGecko => "coingecko",
            SourceTag::CoinPaprika => "coinpaprika",
            SourceTag::Csv => "csv",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceTag {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coingecko" => Ok(SourceTag::CoinGecko),
            "coinpaprika" => Ok(SourceTag::CoinPaprika),
            "csv" => Ok(SourceTag::Csv),
            other => Err(CdpError::Parse(format!("unknown source: {other}"))),
        }
    }
}

/// Lifecycle state of an ETL run. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(CdpError::Parse(format!("unknown run status: {other}"))),
        }
    }
}

/// What a checkpoint value means for a given source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Last fully ingested page number (page-based REST sources)
    Page,
    /// RFC 3339 timestamp of the last pull (snapshot REST sources)
    Timestamp,
    /// RFC 3339 timestamp of the last directory sweep (file sources)
    LastProcessed,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Page => "page",
            CheckpointKind::Timestamp => "timestamp",
            CheckpointKind::LastProcessed => "last_processed",
        }
    }
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointKind {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "page" => Ok(CheckpointKind::Page),
            "timestamp" => Ok(CheckpointKind::Timestamp),
            "last_processed" => Ok(CheckpointKind::LastProcessed),
            other => Err(CdpError::Parse(format!("unknown checkpoint kind: {other}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_round_trip() {
        for tag in SourceTag::ALL {
            assert_eq!(tag.as_str().parse::<SourceTag>().unwrap(), tag);
        }
        assert_eq!("CoinGecko".parse::<SourceTag>().unwrap(), SourceTag::CoinGecko);
        assert!("kraken".parse::<SourceTag>().is_err());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_checkpoint_kind_round_trip() {
        for kind in [CheckpointKind::Page, CheckpointKind::Timestamp, CheckpointKind::LastProcessed] {
            assert_eq!(kind.as_str().parse::<CheckpointKind>().unwrap(), kind);
        }
        assert!("offset".parse::<CheckpointKind>().is_err());
    }

    #[test]
    fn test_serde_forms_match_storage_forms() {
        let json = serde_json::to_string(&SourceTag::CoinPaprika).unwrap();
        assert_eq!(json, "\"coinpaprika\"");
        let kind: CheckpointKind = serde_json::from_str("\"last_processed\"").unwrap();
        assert_eq!(kind, CheckpointKind::LastProcessed);
    }
}
