//! Page-by-page fetching of one stream
//!
//! A [`Paginator`] walks `pgnum = 1..=total_pages` for a single stream at a
//! single path. Each page is normalized, linked to its parent, coerced to the
//! catalog schema and split by the incremental filter. The caller emits a
//! page's records and commits its bookmark before asking for the next one.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tpl_common::{BookmarkValue, Record, Result};
use tracing::{debug, warn};

use crate::normalize::{normalize_stream, total_results};
use crate::schema::coerce_record;
use crate::streams::StreamDefinition;
use crate::transport::{QueryParams, Transport};

// ============================================================================
// Pagination Constants
// ============================================================================

/// Pages fetched per stream and path before giving up on the rest
pub const MAX_PAGES: u64 = 100;

pub const PAGE_NUMBER_PARAM: &str = "pgnum";

pub const RQL_PARAM: &str = "rql";

/// Combine `base` and `overlay` into a new map; overlay wins on conflicts.
pub fn merge<I, K, V>(base: &QueryParams, overlay: I) -> QueryParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut merged = base.clone();
    merged.extend(overlay.into_iter().map(|(k, v)| (k.into(), v.into())));
    merged
}

/// Add `<field>=ge=<bookmark>` to the RQL expression, joining with `;`.
pub fn with_bookmark_filter(
    mut params: QueryParams,
    query_field: &str,
    bookmark: &BookmarkValue,
) -> QueryParams {
    let clause = format!("{}=ge={}", query_field, bookmark);
    let rql = match params.remove(RQL_PARAM) {
        Some(existing) if !existing.is_empty() => format!("{};{}", existing, clause),
        _ => clause,
    };
    params.insert(RQL_PARAM.to_string(), rql);
    params
}

/// Pages implied by a `TotalResults` count
pub fn total_pages(total_results: u64, page_size: u64) -> u64 {
    if total_results < page_size {
        1
    } else {
        total_results.div_ceil(page_size.max(1))
    }
}

/// Identifier stamped onto every record of a child stream
#[derive(Debug, Clone, PartialEq)]
pub struct ParentLink {
    pub field: String,
    pub value: Value,
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct PageResult {
    pub page: u64,
    pub total_pages: u64,
    pub total_results: Option<u64>,
    pub page_size: u64,
    /// Records that passed the incremental filter
    pub records: Vec<Record>,
    /// Records dropped by the incremental filter
    pub stale: Vec<Record>,
    pub extracted_at: DateTime<Utc>,
}

impl PageResult {
    /// Kept records followed by stale ones
    pub fn all_records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().chain(self.stale.iter())
    }
}

pub struct Paginator<'d> {
    def: &'d StreamDefinition,
    path: String,
    last_bookmark: Option<BookmarkValue>,
    max_bookmark: Option<BookmarkValue>,
    parent: Option<ParentLink>,
    schema: Option<Value>,
    page: u64,
    total_pages: u64,
    done: bool,
}

impl<'d> Paginator<'d> {
    /// `last_bookmark` is the committed bookmark; records older than it are stale.
    pub fn new(
        def: &'d StreamDefinition,
        path: impl Into<String>,
        last_bookmark: Option<BookmarkValue>,
    ) -> Self {
        Self {
            def,
            path: path.into(),
            max_bookmark: last_bookmark.clone(),
            last_bookmark,
            parent: None,
            schema: None,
            page: 1,
            total_pages: 1,
            done: false,
        }
    }

    pub fn with_parent(mut self, parent: Option<ParentLink>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_schema(mut self, schema: Option<Value>) -> Self {
        self.schema = schema;
        self
    }

    /// Highest bookmark seen so far, never below the committed one
    pub fn max_bookmark(&self) -> Option<&BookmarkValue> {
        self.max_bookmark.as_ref()
    }

    /// Query for the current page
    pub fn query(&self) -> QueryParams {
        let params = merge(
            &self.def.static_params,
            [(PAGE_NUMBER_PARAM, self.page.to_string())],
        );
        match (&self.def.bookmark_query_field, &self.last_bookmark) {
            (Some(field), Some(bookmark)) => with_bookmark_filter(params, field, bookmark),
            _ => params,
        }
    }

    /// Fetch the next page; `None` once the stream is exhausted.
    pub async fn next_page<T>(&mut self, transport: &T) -> Result<Option<PageResult>>
    where
        T: Transport + ?Sized,
    {
        if self.done || self.page > self.total_pages {
            return Ok(None);
        }
        if self.page > MAX_PAGES {
            warn!(
                stream = %self.def.name,
                path = %self.path,
                total_pages = self.total_pages,
                max_pages = MAX_PAGES,
                "Page cap reached, remaining pages skipped"
            );
            self.done = true;
            return Ok(None);
        }

        let query = self.query();
        let payload = transport.fetch(&self.path, &query).await?;
        let extracted_at = Utc::now();

        let records = normalize_stream(self.def, &payload)?;
        if records.is_empty() {
            debug!(stream = %self.def.name, page = self.page, "Empty page, stopping");
            self.done = true;
            return Ok(None);
        }

        let page_size = self.def.page_size();
        let total = total_results(&payload);
        self.total_pages = total.map_or(1, |t| total_pages(t, page_size));

        let mut kept = Vec::with_capacity(records.len());
        let mut stale = Vec::new();
        for mut record in records {
            if let Some(link) = &self.parent {
                record.insert(link.field.clone(), link.value.clone());
            }
            if let Some(schema) = &self.schema {
                coerce_record(&mut record, schema);
            }
            if self.is_current(&record) {
                kept.push(record);
            } else {
                stale.push(record);
            }
        }

        let result = PageResult {
            page: self.page,
            total_pages: self.total_pages,
            total_results: total,
            page_size,
            records: kept,
            stale,
            extracted_at,
        };
        self.page += 1;
        Ok(Some(result))
    }

    /// Track the running maximum and decide whether `record` is new enough.
    fn is_current(&mut self, record: &Record) -> bool {
        let Some((field, kind)) = self.def.bookmark() else {
            return true;
        };
        let Some(value) = record
            .get(field)
            .and_then(|v| BookmarkValue::from_json(kind, v))
        else {
            return false;
        };

        self.max_bookmark = Some(match self.max_bookmark.take() {
            Some(max) => max.max_with(&value),
            None => value.clone(),
        });
        match &self.last_bookmark {
            Some(last) => value >= *last,
            None => true,
        }
    }
}
