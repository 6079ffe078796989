//! Payload normalization
//!
//! Turns one raw API page into flat, snake_case [`Record`]s. The steps run in
//! a fixed order: de-nest `ReadOnly` and known `_embedded` nodes, strip
//! hypermedia envelopes, rename keys, then run the stream's derivation hook.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tpl_common::{Record, Result, TapError};

use crate::streams::StreamDefinition;

/// `_embedded` sub-nodes lifted onto the record before envelopes are dropped
pub const EMBEDDED_NODES: &[&str] = &["item"];

const READ_ONLY: &str = "ReadOnly";
const EMBEDDED: &str = "_embedded";
const LINKS: &str = "_links";

#[allow(clippy::expect_used)]
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"));
#[allow(clippy::expect_used)]
static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

/// `lastModifiedDate` -> `last_modified_date`, `TotalResults` -> `total_results`
pub fn rename_key(key: &str) -> String {
    let pass = WORD_BOUNDARY.replace_all(key, "${1}_${2}");
    CAMEL_BOUNDARY
        .replace_all(&pass, "${1}_${2}")
        .to_lowercase()
}

/// Rename every object key, descending into arrays.
pub fn rename_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (rename_key(&k), rename_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(rename_keys).collect()),
        other => other,
    }
}

/// Drop `_embedded` and `_links` at every level.
pub fn strip_envelope(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| k != EMBEDDED && k != LINKS)
                .map(|(k, v)| (k, strip_envelope(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_envelope).collect()),
        other => other,
    }
}

/// Hoist `ReadOnly.*` and the known `_embedded` nodes to the top level.
pub fn denest_record(record: &mut Record) {
    if let Some(Value::Object(read_only)) = record.remove(READ_ONLY) {
        for (key, value) in read_only {
            record.insert(key, value);
        }
    }
    let embedded = match record.get(EMBEDDED) {
        Some(Value::Object(embedded)) => EMBEDDED_NODES
            .iter()
            .filter_map(|node| embedded.get(*node).map(|v| (node.to_string(), v.clone())))
            .collect::<Vec<_>>(),
        _ => Vec::new(),
    };
    for (node, value) in embedded {
        record.insert(node, value);
    }
}

/// Normalize a raw page into records.
///
/// An absent or empty payload, or a null/empty data value, yields no
/// records. A payload that is itself an array is taken as the record list.
pub fn normalize(stream: &str, payload: &Value, data_key: &str) -> Result<Vec<Record>> {
    let items = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items.clone(),
        Value::Object(map) if map.is_empty() => return Ok(Vec::new()),
        Value::Object(map) => match map.get(data_key) {
            None => {
                return Err(TapError::malformed_payload(
                    stream,
                    format!("payload has no '{}' key", data_key),
                ));
            },
            Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items.clone(),
            Some(single @ Value::Object(_)) => vec![single.clone()],
            Some(other) => {
                return Err(TapError::malformed_payload(
                    stream,
                    format!("'{}' holds {}, expected a list", data_key, type_name(other)),
                ));
            },
        },
        other => {
            return Err(TapError::malformed_payload(
                stream,
                format!("payload is {}, expected an object", type_name(other)),
            ));
        },
    };

    items
        .into_iter()
        .map(|item| {
            let Value::Object(mut record) = item else {
                return Err(TapError::malformed_payload(
                    stream,
                    format!("list under '{}' holds a non-object", data_key),
                ));
            };
            denest_record(&mut record);
            let record = strip_envelope(Value::Object(record));
            match rename_keys(record) {
                Value::Object(record) => Ok(record),
                other => Err(TapError::malformed_payload(
                    stream,
                    format!("record became {}", type_name(&other)),
                )),
            }
        })
        .collect()
}

/// [`normalize`] followed by the stream's derivation hook.
pub fn normalize_stream(def: &StreamDefinition, payload: &Value) -> Result<Vec<Record>> {
    let mut records = normalize(&def.name, payload, &def.data_key)?;
    if let Some(derive) = def.derive {
        records.iter_mut().for_each(derive);
    }
    Ok(records)
}

/// Read the `TotalResults` count of a page, wherever the casing lands.
pub fn total_results(payload: &Value) -> Option<u64> {
    let value = payload
        .get("TotalResults")
        .or_else(|| payload.get("totalResults"))
        .or_else(|| payload.get("total_results"))?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn nested<'a>(record: &'a Record, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(record.get(*first)?, |value, key| value.get(*key))
}

/// `stock_summaries`: `item_id` from `item_identifier.id`
pub fn derive_stock_summary_ids(record: &mut Record) {
    let item_id = nested(record, &["item_identifier", "id"])
        .cloned()
        .unwrap_or(Value::Null);
    record.insert("item_id".to_string(), item_id);
}

/// `locations`: `location_id` and `facility_id` from `location_identifier`
pub fn derive_location_ids(record: &mut Record) {
    let location_id = nested(record, &["location_identifier", "id"])
        .cloned()
        .unwrap_or(Value::Null);
    let facility_id = nested(
        record,
        &["location_identifier", "name_key", "facility_identifier", "id"],
    )
    .cloned()
    .unwrap_or(Value::Null);
    record.insert("location_id".to_string(), location_id);
    record.insert("facility_id".to_string(), facility_id);
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
