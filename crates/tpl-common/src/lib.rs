//! TPL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the 3PL Central tap.
//!
//! # Overview
//!
//! This crate provides common functionality used across the workspace members:
//!
//! - **Error Handling**: the fatal error taxonomy of a sync run and a result alias
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables
//! - **Types**: records and bookmark values shared by the engine and its collaborators
//!
//! # Example
//!
//! ```no_run
//! use tpl_common::{Result, TapError};
//! use tpl_common::types::{BookmarkType, BookmarkValue};
//!
//! fn parse_bookmark(raw: &serde_json::Value) -> Result<BookmarkValue> {
//!     BookmarkValue::from_json(BookmarkType::Datetime, raw)
//!         .ok_or_else(|| TapError::malformed_state("unparseable bookmark"))
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TapError, TransportError};
pub use types::{BookmarkType, BookmarkValue, Record};
