//! Persisted sync progress
//!
//! [`SyncState`] is the document handed back between runs:
//!
//! ```json
//! {"bookmarks": {"orders": "2021-06-02T10:30:00Z",
//!                "customers": {"42": {"sku_items": "2021-05-01T00:00:00Z"}}},
//!  "currently_syncing": "orders"}
//! ```
//!
//! Root streams bookmark at `[stream]`; a child bookmarks under its parent's
//! node at `[parent, parent_id, child]`, nesting further for grandchildren.
//! [`BookmarkStore`] owns the state and emits it after every mutation.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tpl_common::{Result, TapError};
use tracing::debug;

use crate::emit::Emitter;

/// Bookmarks plus the resume checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub bookmarks: Map<String, Value>,
    /// Accepts the legacy `current_stream` key on input
    #[serde(default, alias = "current_stream")]
    pub currently_syncing: Option<String>,
}

impl SyncState {
    /// Load a state file; an empty file is an empty state.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&raw).map_err(|e| {
            TapError::malformed_state(format!("{}: {}", path.display(), e))
        })
    }
}

/// Nested bookmark map with emit-on-write persistence
pub struct BookmarkStore {
    state: SyncState,
    emitter: Arc<dyn Emitter>,
}

impl BookmarkStore {
    pub fn new(state: SyncState, emitter: Arc<dyn Emitter>) -> Self {
        Self { state, emitter }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn into_state(self) -> SyncState {
        self.state
    }

    /// Value stored at `path`, if every step along it exists
    pub fn get(&self, path: &[String]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.state.bookmarks.get(first)?, |node, key| node.get(key))
    }

    pub fn get_or(&self, path: &[String], default: Value) -> Value {
        self.get(path).cloned().unwrap_or(default)
    }

    /// Store `value` at `path`, creating intermediate nodes, then emit the state.
    pub fn set(&mut self, path: &[String], value: Value) -> Result<()> {
        let Some((leaf, parents)) = path.split_last() else {
            return Err(TapError::malformed_state("empty bookmark path"));
        };

        let mut node = &mut self.state.bookmarks;
        for key in parents {
            let entry = node
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match entry {
                Value::Object(map) => map,
                other => {
                    return Err(TapError::malformed_state(format!(
                        "bookmark path {:?} crosses a non-object value at '{}': {}",
                        path, key, other
                    )));
                },
            };
        }
        if let Some(Value::Object(_)) = node.get(leaf) {
            return Err(TapError::malformed_state(format!(
                "bookmark path {:?} would overwrite nested bookmarks",
                path
            )));
        }
        node.insert(leaf.clone(), value);

        debug!(path = ?path, "Bookmark written");
        self.emitter.emit_state(&self.state)
    }

    pub fn currently_syncing(&self) -> Option<&str> {
        self.state.currently_syncing.as_deref()
    }

    /// Move the resume checkpoint and emit the state
    pub fn set_currently_syncing(&mut self, stream: Option<String>) -> Result<()> {
        self.state.currently_syncing = stream;
        self.emitter.emit_state(&self.state)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::emit::MemoryEmitter;
    use serde_json::json;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    fn store(state: SyncState) -> (BookmarkStore, Arc<MemoryEmitter>) {
        let emitter = Arc::new(MemoryEmitter::new());
        (BookmarkStore::new(state, emitter.clone()), emitter)
    }

    #[test]
    fn test_legacy_current_stream_key() {
        let state: SyncState =
            serde_json::from_value(json!({"bookmarks": {}, "current_stream": "orders"})).unwrap();
        assert_eq!(state.currently_syncing.as_deref(), Some("orders"));
        let state: SyncState = serde_json::from_value(json!({})).unwrap();
        assert_eq!(state, SyncState::default());
    }

    #[test]
    fn test_nested_set_and_get() {
        let (mut store, emitter) = store(SyncState::default());
        let child = path(&["customers", "42", "sku_items"]);
        store.set(&child, json!("2021-05-01T00:00:00Z")).unwrap();
        store.set(&path(&["orders"]), json!("2021-06-02T00:00:00Z")).unwrap();

        assert_eq!(store.get(&child), Some(&json!("2021-05-01T00:00:00Z")));
        assert_eq!(
            store.get_or(&path(&["customers", "7", "sku_items"]), json!(0)),
            json!(0)
        );
        assert_eq!(emitter.states().len(), 2);
        assert_eq!(
            serde_json::to_value(&emitter.states()[1]).unwrap(),
            json!({
                "bookmarks": {
                    "customers": {"42": {"sku_items": "2021-05-01T00:00:00Z"}},
                    "orders": "2021-06-02T00:00:00Z"
                },
                "currently_syncing": null
            })
        );
    }

    #[test]
    fn test_set_through_scalar_is_malformed() {
        let state: SyncState =
            serde_json::from_value(json!({"bookmarks": {"customers": "2020-01-01"}})).unwrap();
        let (mut store, emitter) = store(state);
        let err = store
            .set(&path(&["customers", "42", "sku_items"]), json!("x"))
            .unwrap_err();
        assert!(matches!(err, TapError::MalformedState(_)));
        assert!(emitter.states().is_empty());
    }

    #[test]
    fn test_set_over_nested_node_is_malformed() {
        let (mut store, _) = store(SyncState::default());
        store
            .set(&path(&["customers", "42", "sku_items"]), json!("x"))
            .unwrap();
        assert!(store.set(&path(&["customers"]), json!("y")).is_err());
        assert!(store.set(&[], json!(1)).is_err());
    }

    #[test]
    fn test_currently_syncing_is_emitted() {
        let (mut store, emitter) = store(SyncState::default());
        store.set_currently_syncing(Some("orders".into())).unwrap();
        store.set_currently_syncing(None).unwrap();
        let states = emitter.states();
        assert_eq!(states[0].currently_syncing.as_deref(), Some("orders"));
        assert_eq!(states[1].currently_syncing, None);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("state.json");
        std::fs::write(&file, r#"{"bookmarks": {"orders": 5}}"#).unwrap();
        let state = SyncState::from_file(&file).unwrap();
        assert_eq!(state.bookmarks["orders"], json!(5));

        std::fs::write(&file, "").unwrap();
        assert_eq!(SyncState::from_file(&file).unwrap(), SyncState::default());

        std::fs::write(&file, "[1,2]").unwrap();
        assert!(matches!(
            SyncState::from_file(&file),
            Err(TapError::MalformedState(_))
        ));
    }
}
