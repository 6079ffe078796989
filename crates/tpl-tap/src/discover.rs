//! Discovery mode: describe every stream of a tree as a catalog.

use serde_json::{json, Map, Value};
use tpl_common::BookmarkType;

use crate::catalog::{CatalogEntry, MetadataEntry, SingerCatalog};
use crate::streams::{StreamDefinition, StreamTree};

/// Catalog for every stream in `tree`, nothing selected.
pub fn discover(tree: &StreamTree) -> SingerCatalog {
    SingerCatalog {
        streams: tree.iter().map(catalog_entry).collect(),
    }
}

fn catalog_entry(def: &StreamDefinition) -> CatalogEntry {
    let schema = stream_schema(def);

    let mut root = Map::new();
    root.insert("table-key-properties".into(), json!(def.id_fields));
    match def.bookmark() {
        Some((field, _)) => {
            root.insert("forced-replication-method".into(), json!("INCREMENTAL"));
            root.insert("valid-replication-keys".into(), json!([field]));
        },
        None => {
            root.insert("forced-replication-method".into(), json!("FULL_TABLE"));
        },
    }

    let mut metadata = vec![MetadataEntry {
        breadcrumb: Vec::new(),
        metadata: root,
    }];
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for field in properties.keys() {
            let automatic = def.id_fields.contains(field)
                || def.bookmark_field.as_deref() == Some(field.as_str());
            metadata.push(MetadataEntry {
                breadcrumb: vec!["properties".into(), field.clone()],
                metadata: [(
                    "inclusion".to_string(),
                    json!(if automatic { "automatic" } else { "available" }),
                )]
                .into_iter()
                .collect(),
            });
        }
    }

    CatalogEntry {
        tap_stream_id: def.name.clone(),
        stream: Some(def.name.clone()),
        schema,
        key_properties: def.id_fields.clone(),
        metadata,
        selected: None,
    }
}

/// Permissive object schema declaring the fields the engine relies on
fn stream_schema(def: &StreamDefinition) -> Value {
    let mut properties = Map::new();
    for field in &def.id_fields {
        properties.insert(field.clone(), json!({"type": ["null", "integer", "string"]}));
    }
    if let Some(link) = def.parent_link_field() {
        properties.insert(link, json!({"type": ["null", "integer", "string"]}));
    }
    if let Some((field, kind)) = def.bookmark() {
        let field_schema = match kind {
            BookmarkType::Integer => json!({"type": ["null", "integer"]}),
            BookmarkType::Datetime => json!({"type": ["null", "string"], "format": "date-time"}),
        };
        properties.insert(field.to_string(), field_schema);
    }

    json!({
        "type": ["null", "object"],
        "additionalProperties": true,
        "properties": properties,
    })
}
