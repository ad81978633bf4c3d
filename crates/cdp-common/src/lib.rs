//! CDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the CDP project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all CDP workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Environment-driven tracing initialization
//! - **Types**: Shared domain vocabulary (sources, run statuses, checkpoint kinds)
//!
//! # Example
//!
//! ```no_run
//! use cdp_common::types::SourceTag;
//!
//! let tag: SourceTag = "coingecko".parse()?;
//! assert_eq!(tag.as_str(), "coingecko");
//! # Ok::<(), cdp_common::CdpError>(())
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CdpError, Result};
