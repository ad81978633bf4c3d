//! CDP Server Library
//!
//! HTTP server and incremental ETL engine for cryptocurrency market data.
//!
//! # Overview
//!
//! The CDP server pulls market data from multiple upstream sources and serves
//! the normalized result over a REST API:
//!
//! - **ETL Engine**: checkpointed extract/transform/load pipelines for
//!   CoinGecko, CoinPaprika and a local CSV drop directory
//! - **API Endpoints**: normalized data listing, run history, checkpoints,
//!   platform statistics and ETL triggers
//! - **Database Management**: PostgreSQL integration with SQLx
//! - **Configuration**: Environment-based configuration management
//! - **Middleware**: CORS, request logging, and rate limiting
//!
//! # Framework Stack
//!
//! - **Axum**: Modern, ergonomic web framework
//! - **SQLx**: Async PostgreSQL driver and query builder
//! - **Tower**: Middleware and service abstractions

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod etl;
pub mod middleware;

// Re-export commonly used types
pub use error::{ApiResult, AppError};
