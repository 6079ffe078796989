//! Light record coercion against a JSON schema
//!
//! This is not validation. Values are converted toward the declared type
//! when that is unambiguous (`"12"` for an integer field becomes `12`) and
//! left untouched otherwise. Fields the schema does not declare are kept.

use serde_json::{Map, Number, Value};
use tpl_common::types::{format_datetime, parse_datetime};
use tpl_common::Record;

/// Coerce the fields of `record` in place using `schema.properties`.
pub fn coerce_record(record: &mut Record, schema: &Value) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    coerce_properties(record, properties);
}

fn coerce_properties(record: &mut Map<String, Value>, properties: &Map<String, Value>) {
    for (field, value) in record.iter_mut() {
        if let Some(field_schema) = properties.get(field) {
            coerce_value(value, field_schema);
        }
    }
}

fn coerce_value(value: &mut Value, schema: &Value) {
    if value.is_null() {
        return;
    }
    let types = declared_types(schema);

    if let Some(coerced) = convert_scalar(value, &types, schema) {
        *value = coerced;
        return;
    }

    match value {
        Value::Object(map) if types.is_empty() || types.contains(&"object") => {
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                coerce_properties(map, properties);
            }
        },
        Value::Array(items) if types.is_empty() || types.contains(&"array") => {
            if let Some(item_schema) = schema.get("items") {
                items
                    .iter_mut()
                    .for_each(|item| coerce_value(item, item_schema));
            }
        },
        _ => {},
    }
}

/// Declared non-null types; `type` may be a string or a list.
fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
    .into_iter()
    .filter(|t| *t != "null")
    .collect()
}

fn convert_scalar(value: &Value, types: &[&str], schema: &Value) -> Option<Value> {
    let is_datetime = schema.get("format").and_then(Value::as_str) == Some("date-time");

    match value {
        Value::String(s) => {
            if types.contains(&"string") {
                if is_datetime {
                    return parse_datetime(s).map(|dt| Value::String(format_datetime(&dt)));
                }
                return None;
            }
            let trimmed = s.trim();
            if types.contains(&"integer") {
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Some(Value::from(i));
                }
            }
            if types.contains(&"number") {
                if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
                    return Some(Value::Number(n));
                }
            }
            if types.contains(&"boolean") {
                match trimmed.to_ascii_lowercase().as_str() {
                    "true" => return Some(Value::Bool(true)),
                    "false" => return Some(Value::Bool(false)),
                    _ => {},
                }
            }
            None
        },
        Value::Number(n) => {
            if types.contains(&"integer") && !n.is_i64() && !n.is_u64() {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    return Some(Value::from(f as i64));
                }
                return None;
            }
            if types == ["string"] {
                return Some(Value::String(n.to_string()));
            }
            None
        },
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_scalar_coercions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "qty": {"type": ["null", "integer"]},
                "weight": {"type": "number"},
                "active": {"type": ["null", "boolean"]},
                "code": {"type": ["null", "string"]},
                "modified": {"type": ["null", "string"], "format": "date-time"}
            }
        });
        let mut rec = record(json!({
            "qty": "12",
            "weight": "1.5",
            "active": "TRUE",
            "code": 42,
            "modified": "2021-06-01T02:00:00+02:00",
            "extra": "kept"
        }));
        coerce_record(&mut rec, &schema);
        assert_eq!(
            Value::Object(rec),
            json!({
                "qty": 12,
                "weight": 1.5,
                "active": true,
                "code": "42",
                "modified": "2021-06-01T00:00:00Z",
                "extra": "kept"
            })
        );
    }

    #[test]
    fn test_uncoercible_values_are_left_alone() {
        let schema = json!({"properties": {"qty": {"type": "integer"}, "at": {"type": "string", "format": "date-time"}}});
        let mut rec = record(json!({"qty": "many", "at": "soon"}));
        coerce_record(&mut rec, &schema);
        assert_eq!(rec["qty"], json!("many"));
        assert_eq!(rec["at"], json!("soon"));
    }

    #[test]
    fn test_nested_objects_and_arrays() {
        let schema = json!({
            "properties": {
                "item": {
                    "type": ["null", "array"],
                    "items": {
                        "type": "object",
                        "properties": {"item_id": {"type": "integer"}}
                    }
                },
                "totals": {
                    "type": "object",
                    "properties": {"count": {"type": "integer"}}
                }
            }
        });
        let mut rec = record(json!({
            "item": [{"item_id": "5"}, {"item_id": 6.0}],
            "totals": {"count": "3"}
        }));
        coerce_record(&mut rec, &schema);
        assert_eq!(rec["item"], json!([{"item_id": 5}, {"item_id": 6}]));
        assert_eq!(rec["totals"], json!({"count": 3}));
    }

    #[test]
    fn test_schema_without_properties_is_noop() {
        let mut rec = record(json!({"a": "1"}));
        coerce_record(&mut rec, &json!({"type": "object"}));
        assert_eq!(rec["a"], json!("1"));
    }
}
