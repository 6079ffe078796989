//! Sync orchestration
//!
//! Walks the stream tree depth-first. A stream is fetched when it is
//! selected, when one of its descendants is selected, or when it is (or
//! contains) the stream an interrupted run was working on. Only selected
//! streams emit records and advance bookmarks; the others, and the ancestors
//! walked on the way back to a checkpoint, are paged through only to
//! enumerate parent identifiers for their children.
//!
//! Children run after their parent's page loop: for each child, once per
//! distinct parent identifier, in first-seen order. `currently_syncing`
//! names the stream in progress so a failed run can resume there.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tpl_common::{BookmarkType, BookmarkValue, Result, TapError};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bookmarks::{BookmarkStore, SyncState};
use crate::catalog::{Catalog, CatalogStream};
use crate::emit::Emitter;
use crate::paginate::{PageResult, Paginator, ParentLink};
use crate::streams::{StreamDefinition, StreamTree, MAX_TREE_DEPTH};
use crate::transport::Transport;

/// Collaborators shared by the whole traversal
pub struct SyncContext<'a> {
    pub transport: &'a dyn Transport,
    pub emitter: Arc<dyn Emitter>,
    pub catalog: &'a dyn Catalog,
    /// Bookmark floor for datetime streams never synced before
    pub start_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub records_emitted: u64,
    pub pages_fetched: u64,
}

/// Per-stream counters for one run, summed over all parents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub streams: BTreeMap<String, StreamSummary>,
}

impl SyncSummary {
    pub fn total_records(&self) -> u64 {
        self.streams.values().map(|s| s.records_emitted).sum()
    }

    pub fn total_pages(&self) -> u64 {
        self.streams.values().map(|s| s.pages_fetched).sum()
    }

    pub fn stream(&self, name: &str) -> StreamSummary {
        self.streams.get(name).copied().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub state: SyncState,
    pub summary: SyncSummary,
}

/// Sync `selected` streams of `tree`, starting from `state`.
///
/// Every state change is emitted as it happens, so on error the last
/// emitted state is the checkpoint to resume from.
pub async fn run(
    ctx: &SyncContext<'_>,
    tree: &StreamTree,
    state: SyncState,
    selected: &BTreeSet<String>,
) -> Result<SyncOutcome> {
    for name in selected {
        if tree.find(name).is_none() {
            warn!(stream = %name, "Selected stream is not part of the stream tree");
        }
    }
    if selected.is_empty() {
        info!("No streams selected");
        return Ok(SyncOutcome {
            state,
            summary: SyncSummary::default(),
        });
    }

    let mut resume_target = state.currently_syncing.clone();
    if let Some(target) = resume_target.as_deref() {
        if tree.find(target).is_some() {
            info!(stream = %target, "Resuming interrupted sync");
        } else {
            warn!(stream = %target, "Checkpoint names an unknown stream, starting over");
            resume_target = None;
        }
    }
    info!(streams = ?selected, "Starting sync");

    let mut orchestrator = SyncOrchestrator {
        ctx,
        selected,
        store: BookmarkStore::new(state, ctx.emitter.clone()),
        resume_target,
        schemas_sent: HashSet::new(),
        summary: SyncSummary::default(),
    };
    for root in tree.roots() {
        orchestrator
            .sync_stream(root, StreamScope::root(root))
            .await?;
    }
    if orchestrator.store.currently_syncing().is_some() {
        orchestrator.store.set_currently_syncing(None)?;
    }

    let summary = orchestrator.summary;
    info!(
        records = summary.total_records(),
        pages = summary.total_pages(),
        "Sync complete"
    );
    Ok(SyncOutcome {
        state: orchestrator.store.into_state(),
        summary,
    })
}

/// Where a stream sits in the traversal
#[derive(Debug, Clone, Default)]
struct StreamScope {
    /// Identifiers filling the path template, outermost first
    ancestor_ids: Vec<String>,
    bookmark_path: Vec<String>,
    parent_id: Option<Value>,
    enclosing: Option<String>,
    depth: usize,
}

impl StreamScope {
    fn root(def: &StreamDefinition) -> Self {
        Self {
            bookmark_path: vec![def.name.clone()],
            depth: 1,
            ..Default::default()
        }
    }

    fn child(
        &self,
        parent: &StreamDefinition,
        child: &StreamDefinition,
        id: &str,
        raw_id: &Value,
    ) -> Self {
        let mut ancestor_ids = self.ancestor_ids.clone();
        ancestor_ids.push(id.to_string());
        let mut bookmark_path = self.bookmark_path.clone();
        bookmark_path.push(id.to_string());
        bookmark_path.push(child.name.clone());
        Self {
            ancestor_ids,
            bookmark_path,
            parent_id: Some(raw_id.clone()),
            enclosing: Some(parent.name.clone()),
            depth: self.depth + 1,
        }
    }
}

type SyncFuture<'s> = Pin<Box<dyn Future<Output = Result<()>> + Send + 's>>;

struct SyncOrchestrator<'c> {
    ctx: &'c SyncContext<'c>,
    selected: &'c BTreeSet<String>,
    store: BookmarkStore,
    resume_target: Option<String>,
    schemas_sent: HashSet<String>,
    summary: SyncSummary,
}

impl<'c> SyncOrchestrator<'c> {
    fn should_fetch(&self, def: &StreamDefinition) -> bool {
        self.selected.contains(&def.name)
            || def.has_selected_descendant(self.selected)
            || self
                .resume_target
                .as_deref()
                .is_some_and(|target| def.subtree_contains(target))
    }

    fn sync_stream<'s>(&'s mut self, def: &'s StreamDefinition, scope: StreamScope) -> SyncFuture<'s> {
        let span = info_span!(
            "sync_stream",
            stream = %def.name,
            parent_id = scope.ancestor_ids.last().map(String::as_str).unwrap_or(""),
        );
        Box::pin(
            async move {
                if scope.depth > MAX_TREE_DEPTH {
                    return Err(TapError::config(format!(
                        "stream '{}' reached depth {} (max {})",
                        def.name, scope.depth, MAX_TREE_DEPTH
                    )));
                }

                if let Some(target) = self.resume_target.as_deref() {
                    if !def.subtree_contains(target) {
                        debug!(resume_at = %target, "Skipping stream before the checkpoint");
                        return Ok(());
                    }
                }
                if !self.should_fetch(def) {
                    debug!("Stream not selected, skipping");
                    return Ok(());
                }
                if self.resume_target.as_deref() == Some(def.name.as_str()) {
                    info!("Reached checkpoint, restarting stream from page 1");
                    self.resume_target = None;
                }

                // ancestors of a pending checkpoint are walked for ids only
                let persist =
                    self.selected.contains(&def.name) && self.resume_target.is_none();
                self.store.set_currently_syncing(Some(def.name.clone()))?;
                let parent_ids = self.sync_pages(def, &scope, persist).await?;

                for child in &def.children {
                    if !self.should_fetch(child) {
                        continue;
                    }
                    for (id, raw_id) in &parent_ids {
                        let child_scope = scope.child(def, child, id, raw_id);
                        self.sync_stream(child, child_scope).await?;
                    }
                }

                // checkpoint unreachable, e.g. no parent ids this run
                if let Some(target) = self.resume_target.as_deref() {
                    if def.subtree_contains(target) {
                        warn!(
                            resume_at = %target,
                            "Checkpoint stream not reached, resuming after it"
                        );
                        self.resume_target = None;
                    }
                }

                self.store.set_currently_syncing(scope.enclosing.clone())?;
                Ok(())
            }
            .instrument(span),
        )
    }

    /// Page through one stream at one path; returns distinct parent ids.
    async fn sync_pages(
        &mut self,
        def: &StreamDefinition,
        scope: &StreamScope,
        persist: bool,
    ) -> Result<Vec<(String, Value)>> {
        let catalog_stream = self.ctx.catalog.get_stream(&def.name);
        if persist {
            self.ensure_schema(def, catalog_stream.as_ref())?;
        }

        let last = self.last_bookmark(def, &scope.bookmark_path)?;
        let path = def.render_path(&scope.ancestor_ids);
        let parent = match (def.parent_link_field(), &scope.parent_id) {
            (Some(field), Some(value)) => Some(ParentLink {
                field,
                value: value.clone(),
            }),
            _ => None,
        };
        info!(
            path = %path,
            persist,
            since = %last.as_ref().map(ToString::to_string).unwrap_or_default(),
            "Sync start"
        );

        let mut paginator = Paginator::new(def, path, last)
            .with_parent(parent)
            .with_schema(catalog_stream.map(|s| s.schema));
        let id_field = if def.children.is_empty() {
            None
        } else {
            def.parent_id_field()
        };

        let mut parent_ids = Vec::new();
        let mut seen = HashSet::new();
        while let Some(page) = paginator.next_page(self.ctx.transport).await? {
            if let Some(field) = id_field {
                collect_ids(&page, field, &mut seen, &mut parent_ids);
            }
            let (page_number, total_pages) = (page.page, page.total_pages);
            let emitted = if persist {
                self.emit_page(def, page)?
            } else {
                0
            };

            if persist && def.is_incremental() {
                if let Some(max) = paginator.max_bookmark() {
                    self.store.set(&scope.bookmark_path, max.to_json())?;
                }
            }

            let stats = self.summary.streams.entry(def.name.clone()).or_default();
            stats.pages_fetched += 1;
            stats.records_emitted += emitted;
            info!(page = page_number, total_pages, records = emitted, "Synced page");
        }
        Ok(parent_ids)
    }

    fn emit_page(&self, def: &StreamDefinition, page: PageResult) -> Result<u64> {
        let mut emitted = 0;
        for record in page.records {
            self.ctx
                .emitter
                .emit_record(&def.name, record, page.extracted_at)?;
            emitted += 1;
        }
        Ok(emitted)
    }

    fn ensure_schema(&mut self, def: &StreamDefinition, stream: Option<&CatalogStream>) -> Result<()> {
        if self.schemas_sent.contains(&def.name) {
            return Ok(());
        }
        let stream = stream.ok_or_else(|| {
            TapError::catalog(format!("selected stream '{}' has no catalog entry", def.name))
        })?;
        let bookmark_properties: Vec<String> = def.bookmark_field.iter().cloned().collect();
        self.ctx.emitter.emit_schema(
            &def.name,
            &stream.schema,
            &stream.key_properties,
            &bookmark_properties,
        )?;
        self.schemas_sent.insert(def.name.clone());
        Ok(())
    }

    /// Committed bookmark at `path`, or the stream's floor when none is stored
    fn last_bookmark(&self, def: &StreamDefinition, path: &[String]) -> Result<Option<BookmarkValue>> {
        let Some((_, kind)) = def.bookmark() else {
            return Ok(None);
        };
        match self.store.get(path) {
            None | Some(Value::Null) => Ok(Some(match kind {
                BookmarkType::Integer => BookmarkValue::Integer(0),
                BookmarkType::Datetime => BookmarkValue::Datetime(self.ctx.start_date),
            })),
            Some(stored) => BookmarkValue::from_json(kind, stored).map(Some).ok_or_else(|| {
                TapError::malformed_state(format!(
                    "bookmark {:?} is not a valid {}: {}",
                    path, kind, stored
                ))
            }),
        }
    }
}

/// Append unseen identifiers from every record of the page, kept or stale.
fn collect_ids(
    page: &PageResult,
    field: &str,
    seen: &mut HashSet<String>,
    ids: &mut Vec<(String, Value)>,
) {
    for record in page.all_records() {
        match record.get(field) {
            None | Some(Value::Null) => {
                warn!(field, "Record has no identifier, children skipped for it");
            },
            Some(raw) => {
                let id = match raw {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if seen.insert(id.clone()) {
                    ids.push((id, raw.clone()));
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(records: Vec<Value>, stale: Vec<Value>) -> PageResult {
        let to_records = |values: Vec<Value>| {
            values
                .into_iter()
                .map(|v| serde_json::from_value(v).unwrap())
                .collect()
        };
        PageResult {
            page: 1,
            total_pages: 1,
            total_results: None,
            page_size: 100,
            records: to_records(records),
            stale: to_records(stale),
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn test_collect_ids_distinct_in_first_seen_order() {
        let page = page(
            vec![json!({"customer_id": 42}), json!({"customer_id": 7}), json!({})],
            vec![json!({"customer_id": 42}), json!({"customer_id": "x9"})],
        );
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        collect_ids(&page, "customer_id", &mut seen, &mut ids);
        let names: Vec<&str> = ids.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(names, vec!["42", "7", "x9"]);
        assert_eq!(ids[0].1, json!(42));
    }

    #[test]
    fn test_child_scope_extends_paths() {
        let parent = StreamDefinition::new("customers", "customers").id_fields(["customer_id"]);
        let child = StreamDefinition::new("sku_items", "customers/{}/items").parent("customer");
        let scope = StreamScope::root(&parent).child(&parent, &child, "42", &json!(42));
        assert_eq!(scope.bookmark_path, vec!["customers", "42", "sku_items"]);
        assert_eq!(scope.ancestor_ids, vec!["42"]);
        assert_eq!(scope.enclosing.as_deref(), Some("customers"));
        assert_eq!(scope.depth, 2);
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = SyncSummary::default();
        summary.streams.insert(
            "orders".into(),
            StreamSummary {
                records_emitted: 3,
                pages_fetched: 2,
            },
        );
        assert_eq!(summary.total_records(), 3);
        assert_eq!(summary.total_pages(), 2);
        assert_eq!(summary.stream("missing"), StreamSummary::default());
    }
}
