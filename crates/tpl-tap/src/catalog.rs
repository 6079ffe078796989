//! Stream selection and schemas
//!
//! The sync engine only sees the [`Catalog`] trait. [`SingerCatalog`] reads
//! the catalog document produced by discovery and edited by the operator.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tpl_common::{Result, TapError};

/// What the sync engine needs to know about one stream
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogStream {
    pub schema: Value,
    pub key_properties: Vec<String>,
    pub selected: bool,
}

pub trait Catalog: Send + Sync {
    fn get_stream(&self, name: &str) -> Option<CatalogStream>;

    fn selected_streams(&self) -> BTreeSet<String>;
}

/// Singer-style metadata entry; `breadcrumb: []` addresses the stream itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(default)]
    pub breadcrumb: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

impl CatalogEntry {
    /// Selection flag: stream-level metadata first, then the legacy
    /// top-level and in-schema `selected` keys.
    pub fn is_selected(&self) -> bool {
        self.metadata
            .iter()
            .find(|m| m.breadcrumb.is_empty())
            .and_then(|m| m.metadata.get("selected"))
            .and_then(Value::as_bool)
            .or(self.selected)
            .or_else(|| self.schema.get("selected").and_then(Value::as_bool))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingerCatalog {
    pub streams: Vec<CatalogEntry>,
}

impl SingerCatalog {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
            .map_err(|e| TapError::catalog(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let catalog: SingerCatalog =
            serde_json::from_str(raw).map_err(|e| TapError::catalog(e.to_string()))?;
        let mut seen = BTreeSet::new();
        for entry in &catalog.streams {
            if !seen.insert(entry.tap_stream_id.as_str()) {
                return Err(TapError::catalog(format!(
                    "stream '{}' appears more than once",
                    entry.tap_stream_id
                )));
            }
        }
        Ok(catalog)
    }

    fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == name)
    }

    /// Mark the named streams selected and every other stream unselected
    pub fn select<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        for entry in &mut self.streams {
            let selected = names.contains(&entry.tap_stream_id);
            entry.selected = Some(selected);
            match entry.metadata.iter_mut().find(|m| m.breadcrumb.is_empty()) {
                Some(root) => {
                    root.metadata.insert("selected".into(), Value::Bool(selected));
                },
                None => entry.metadata.push(MetadataEntry {
                    breadcrumb: Vec::new(),
                    metadata: [("selected".to_string(), Value::Bool(selected))]
                        .into_iter()
                        .collect(),
                }),
            }
        }
    }
}

impl Catalog for SingerCatalog {
    fn get_stream(&self, name: &str) -> Option<CatalogStream> {
        self.entry(name).map(|e| CatalogStream {
            schema: e.schema.clone(),
            key_properties: e.key_properties.clone(),
            selected: e.is_selected(),
        })
    }

    fn selected_streams(&self) -> BTreeSet<String> {
        self.streams
            .iter()
            .filter(|e| e.is_selected())
            .map(|e| e.tap_stream_id.clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "streams": [
            {
                "tap_stream_id": "orders",
                "schema": {"type": "object", "properties": {}},
                "key_properties": ["order_id"],
                "metadata": [
                    {"breadcrumb": [], "metadata": {"selected": true}},
                    {"breadcrumb": ["properties", "order_id"], "metadata": {"inclusion": "automatic"}}
                ]
            },
            {"tap_stream_id": "customers", "schema": {}, "selected": true},
            {"tap_stream_id": "inventory", "schema": {"selected": true}},
            {
                "tap_stream_id": "sku_items",
                "schema": {},
                "selected": true,
                "metadata": [{"breadcrumb": [], "metadata": {"selected": false}}]
            },
            {"tap_stream_id": "locations", "schema": {}}
        ]
    }"#;

    #[test]
    fn test_selection_sources() {
        let catalog = SingerCatalog::parse(CATALOG).unwrap();
        let selected: Vec<_> = catalog.selected_streams().into_iter().collect();
        assert_eq!(selected, vec!["customers", "inventory", "orders"]);
        let orders = catalog.get_stream("orders").unwrap();
        assert_eq!(orders.key_properties, vec!["order_id"]);
        assert!(catalog.get_stream("missing").is_none());
    }

    #[test]
    fn test_duplicate_streams_rejected() {
        let raw = r#"{"streams": [{"tap_stream_id": "a"}, {"tap_stream_id": "a"}]}"#;
        assert!(matches!(SingerCatalog::parse(raw), Err(TapError::Catalog(_))));
    }

    #[test]
    fn test_select_rewrites_flags() {
        let mut catalog = SingerCatalog::parse(CATALOG).unwrap();
        catalog.select(["locations"]);
        let selected: Vec<_> = catalog.selected_streams().into_iter().collect();
        assert_eq!(selected, vec!["locations"]);
    }
}
