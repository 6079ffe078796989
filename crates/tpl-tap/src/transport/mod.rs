//! Transport to the 3PL Central REST API
//!
//! The sync engine depends only on [`Transport`]. Retries, token refresh and
//! client-side rate limiting live behind it in [`TplClient`]; whatever error
//! escapes `fetch` is final.

mod client;
mod rate_limit;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tpl_common::TransportError;

pub use client::{ClientSettings, TplClient};
pub use rate_limit::RateLimiter;

/// Query string parameters, sent in key order
pub type QueryParams = BTreeMap<String, String>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path` (relative to the API base) and decode the JSON body
    async fn fetch(&self, path: &str, query: &QueryParams) -> Result<Value, TransportError>;
}
