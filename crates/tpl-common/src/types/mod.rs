//! Common types used across the tap

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A normalized record: ordered field name to value mapping.
pub type Record = serde_json::Map<String, Value>;

/// Data type of a stream's replication key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkType {
    Integer,
    Datetime,
}

impl std::fmt::Display for BookmarkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookmarkType::Integer => write!(f, "integer"),
            BookmarkType::Datetime => write!(f, "datetime"),
        }
    }
}

/// A replication-key value.
///
/// Datetimes are held as UTC instants so that `2021-06-01T00:00:00Z` and
/// `2021-06-01T00:00:00.000000Z` compare equal, which string comparison
/// would not guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkValue {
    Integer(i64),
    Datetime(DateTime<Utc>),
}

impl BookmarkValue {
    /// Interpret a JSON value as a bookmark of the given type.
    ///
    /// Integers may arrive as numbers or numeric strings. Returns `None`
    /// when the value cannot be read as the requested type.
    pub fn from_json(kind: BookmarkType, value: &Value) -> Option<Self> {
        match kind {
            BookmarkType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(BookmarkValue::Integer),
                Value::String(s) => s.trim().parse().ok().map(BookmarkValue::Integer),
                _ => None,
            },
            BookmarkType::Datetime => value
                .as_str()
                .and_then(parse_datetime)
                .map(BookmarkValue::Datetime),
        }
    }

    /// JSON form written to the persisted state
    pub fn to_json(&self) -> Value {
        match self {
            BookmarkValue::Integer(i) => Value::from(*i),
            BookmarkValue::Datetime(dt) => Value::String(format_datetime(dt)),
        }
    }

    pub fn kind(&self) -> BookmarkType {
        match self {
            BookmarkValue::Integer(_) => BookmarkType::Integer,
            BookmarkValue::Datetime(_) => BookmarkType::Datetime,
        }
    }

    /// Keep the larger of `self` and `other`; values of another type are ignored.
    pub fn max_with(self, other: &BookmarkValue) -> BookmarkValue {
        match self.partial_cmp(other) {
            Some(Ordering::Less) => other.clone(),
            _ => self,
        }
    }
}

impl PartialOrd for BookmarkValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (BookmarkValue::Integer(a), BookmarkValue::Integer(b)) => Some(a.cmp(b)),
            (BookmarkValue::Datetime(a), BookmarkValue::Datetime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Rendered the way it goes into an RQL filter expression.
impl std::fmt::Display for BookmarkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookmarkValue::Integer(i) => write!(f, "{}", i),
            BookmarkValue::Datetime(dt) => write!(f, "{}", format_datetime(dt)),
        }
    }
}

/// Parse the datetime shapes the API and state files use.
///
/// Accepts RFC 3339 with any offset, plus naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// and bare dates, which are taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// RFC 3339 in UTC with a `Z` suffix; sub-second digits only when present.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_datetime_variants() {
        let expected = parse_datetime("2021-06-01T00:00:00Z").unwrap();
        assert_eq!(parse_datetime("2021-06-01T02:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_datetime("2021-06-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_datetime("2021-06-01T00:00:00.000").unwrap(), expected);
        assert_eq!(parse_datetime("2021-06-01").unwrap(), expected);
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn test_bookmark_from_json() {
        assert_eq!(
            BookmarkValue::from_json(BookmarkType::Integer, &json!(42)),
            Some(BookmarkValue::Integer(42))
        );
        assert_eq!(
            BookmarkValue::from_json(BookmarkType::Integer, &json!("17")),
            Some(BookmarkValue::Integer(17))
        );
        assert_eq!(BookmarkValue::from_json(BookmarkType::Integer, &json!("x")), None);
        assert!(BookmarkValue::from_json(BookmarkType::Datetime, &json!("2020-01-01T00:00:00Z"))
            .is_some());
        assert_eq!(BookmarkValue::from_json(BookmarkType::Datetime, &json!(5)), None);
    }

    #[test]
    fn test_datetime_ordering_uses_instants() {
        let a = BookmarkValue::from_json(BookmarkType::Datetime, &json!("2021-06-01T00:00:00Z"))
            .unwrap();
        let b = BookmarkValue::from_json(
            BookmarkType::Datetime,
            &json!("2021-06-01T00:00:00.000000Z"),
        )
        .unwrap();
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Equal));
    }

    #[test]
    fn test_max_with_ignores_mismatched_types() {
        let int = BookmarkValue::Integer(5);
        let dt = BookmarkValue::Datetime(parse_datetime("2021-01-01").unwrap());
        assert_eq!(int.clone().max_with(&dt), int);
        assert_eq!(int.max_with(&BookmarkValue::Integer(9)), BookmarkValue::Integer(9));
    }

    #[test]
    fn test_round_trips_through_state_json() {
        let dt = BookmarkValue::from_json(BookmarkType::Datetime, &json!("2021-06-02T10:30:00Z"))
            .unwrap();
        assert_eq!(dt.to_json(), json!("2021-06-02T10:30:00Z"));
        assert_eq!(dt.to_string(), "2021-06-02T10:30:00Z");
        assert_eq!(BookmarkValue::Integer(3).to_json(), json!(3));
    }
}
