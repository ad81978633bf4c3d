//! ETL error taxonomy.
//!
//! Every failure inside the pipeline is classified into one of four buckets,
//! and the classification decides how far the failure propagates:
//!
//! - [`EtlError::Retryable`]: transient upstream trouble; the operation is
//!   retried with backoff before anything else happens.
//! - [`EtlError::Validation`]: malformed data; the offending record is skipped
//!   and counted, the run keeps going.
//! - [`EtlError::Storage`]: database failure; the current stage and therefore
//!   the run fails.
//! - [`EtlError::Fatal`]: everything unrecoverable (auth, unexpected status,
//!   exhausted retries); the run fails.

use thiserror::Error;

/// Result type alias for ETL operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    /// Transient upstream failure worth retrying (HTTP 429/5xx, timeouts,
    /// connection resets).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Malformed or incomplete record data.
    #[error("validation: {0}")]
    Validation(String),

    /// Database failure.
    #[error("storage: {0}")]
    Storage(#[from] sqlx::Error),

    /// Unrecoverable failure.
    #[error("{0}")]
    Fatal(String),
}

impl EtlError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        EtlError::Retryable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EtlError::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        EtlError::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EtlError::Retryable(_))
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level trouble is worth another attempt; a body we cannot
        // decode is a data problem, not a network one.
        if err.is_timeout() || err.is_connect() {
            EtlError::Retryable(format!("transport error: {err}"))
        } else if err.is_decode() {
            EtlError::Validation(format!("response decode error: {err}"))
        } else {
            EtlError::Fatal(format!("http error: {err}"))
        }
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Fatal(format!("io error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(EtlError::retryable("429").is_retryable());
        assert!(!EtlError::validation("missing id").is_retryable());
        assert!(!EtlError::fatal("bad key").is_retryable());
    }

    #[test]
    fn display_includes_class() {
        let err = EtlError::validation("row 3 has no coin id");
        assert_eq!(err.to_string(), "validation: row 3 has no coin id");
    }
}
