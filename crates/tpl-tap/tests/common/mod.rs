//! Shared fixtures for tap integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tpl_common::types::parse_datetime;
use tpl_common::TransportError;
use tpl_tap::catalog::SingerCatalog;
use tpl_tap::discover::discover;
use tpl_tap::emit::MemoryEmitter;
use tpl_tap::transport::{QueryParams, Transport};
use tpl_tap::{run, StreamTree, SyncContext, SyncOutcome, SyncState};

/// Serves canned pages per path, indexed by `pgnum`
#[derive(Default)]
pub struct FakeTransport {
    pages: HashMap<String, Vec<Value>>,
    failures: HashMap<(String, u64), String>,
    calls: Mutex<Vec<(String, QueryParams)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, path: &str, pages: Vec<Value>) -> Self {
        self.pages.insert(path.to_string(), pages);
        self
    }

    /// Fail the request for `page` of `path` with a network error
    pub fn failing_at(mut self, path: &str, page: u64) -> Self {
        self.failures
            .insert((path.to_string(), page), "connection reset".to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, QueryParams)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|(path, _)| path).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, path: &str, query: &QueryParams) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), query.clone()));
        let page: u64 = query
            .get("pgnum")
            .and_then(|p| p.parse().ok())
            .unwrap_or(1);
        if let Some(message) = self.failures.get(&(path.to_string(), page)) {
            return Err(TransportError::Network(message.clone()));
        }
        Ok(self
            .pages
            .get(path)
            .and_then(|pages| pages.get(page as usize - 1))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// A page in the API's envelope
pub fn page(total: u64, records: Vec<Value>) -> Value {
    json!({"TotalResults": total, "ResourceList": records})
}

pub fn start_date() -> DateTime<Utc> {
    parse_datetime("2021-01-01T00:00:00Z").unwrap()
}

/// Discovered catalog for `tree` with only `selected` streams selected
pub fn catalog(tree: &StreamTree, selected: &[&str]) -> SingerCatalog {
    let mut catalog = discover(tree);
    catalog.select(selected);
    catalog
}

pub fn selection(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

pub struct Harness {
    pub emitter: Arc<MemoryEmitter>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            emitter: Arc::new(MemoryEmitter::new()),
        }
    }

    pub async fn run(
        &self,
        transport: &FakeTransport,
        tree: &StreamTree,
        state: SyncState,
        selected: &[&str],
    ) -> tpl_common::Result<SyncOutcome> {
        let catalog = catalog(tree, selected);
        let ctx = SyncContext {
            transport,
            emitter: self.emitter.clone(),
            catalog: &catalog,
            start_date: start_date(),
        };
        run(&ctx, tree, state, &selection(selected)).await
    }
}
