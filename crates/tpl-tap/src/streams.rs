//! Stream tree declaration
//!
//! Every extractable 3PL Central resource is described by an immutable
//! [`StreamDefinition`]. Definitions form a tree: a child's path template
//! carries positional `{}` placeholders that are filled, in order, with the
//! identifiers of its ancestors' records. The tree is validated once when
//! it is built, before any request is made.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tpl_common::{BookmarkType, Record, Result, TapError};

use crate::config::TapConfig;
use crate::normalize::{derive_location_ids, derive_stock_summary_ids};

// ============================================================================
// Stream Tree Constants
// ============================================================================

/// Deepest parent/child nesting accepted at load time.
pub const MAX_TREE_DEPTH: usize = 4;

/// JSON key holding the result list when a stream does not override it.
pub const DEFAULT_DATA_KEY: &str = "ResourceList";

/// Page size used when a stream does not declare `pgsiz`.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Query parameter carrying the page size.
pub const PAGE_SIZE_PARAM: &str = "pgsiz";

const PLACEHOLDER: &str = "{}";

/// Per-stream hook run after key renaming to synthesize identifier fields.
pub type DeriveFn = fn(&mut Record);

/// Declarative description of one stream.
#[derive(Debug, Clone)]
pub struct StreamDefinition {
    pub name: String,
    /// Relative API path, with one `{}` per ancestor identifier it consumes
    pub path_template: String,
    /// Page size, sort, RQL and filter parameters sent on every page
    pub static_params: BTreeMap<String, String>,
    pub data_key: String,
    /// Normalized record field holding the replication key
    pub bookmark_field: Option<String>,
    pub bookmark_type: Option<BookmarkType>,
    /// API-side field name used in the RQL `=ge=` filter
    pub bookmark_query_field: Option<String>,
    pub id_fields: Vec<String>,
    /// Singular parent name; child records get `<parent_name>_id`
    pub parent_name: Option<String>,
    pub derive: Option<DeriveFn>,
    pub children: Vec<StreamDefinition>,
}

impl StreamDefinition {
    pub fn new(name: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_template: path_template.into(),
            static_params: BTreeMap::new(),
            data_key: DEFAULT_DATA_KEY.to_string(),
            bookmark_field: None,
            bookmark_type: None,
            bookmark_query_field: None,
            id_fields: Vec::new(),
            parent_name: None,
            derive: None,
            children: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_params.insert(key.into(), value.into());
        self
    }

    pub fn data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = key.into();
        self
    }

    /// Mark the stream incremental on `field`
    pub fn incremental(mut self, field: impl Into<String>, kind: BookmarkType) -> Self {
        self.bookmark_field = Some(field.into());
        self.bookmark_type = Some(kind);
        self
    }

    pub fn bookmark_query_field(mut self, field: impl Into<String>) -> Self {
        self.bookmark_query_field = Some(field.into());
        self
    }

    pub fn id_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn parent(mut self, parent_name: impl Into<String>) -> Self {
        self.parent_name = Some(parent_name.into());
        self
    }

    pub fn derive(mut self, hook: DeriveFn) -> Self {
        self.derive = Some(hook);
        self
    }

    pub fn child(mut self, child: StreamDefinition) -> Self {
        self.children.push(child);
        self
    }

    /// Record field and type of the replication key, if incremental
    pub fn bookmark(&self) -> Option<(&str, BookmarkType)> {
        match (&self.bookmark_field, self.bookmark_type) {
            (Some(field), Some(kind)) => Some((field.as_str(), kind)),
            _ => None,
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.bookmark().is_some()
    }

    pub fn page_size(&self) -> u64 {
        self.static_params
            .get(PAGE_SIZE_PARAM)
            .and_then(|v| v.parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Field whose value identifies a record to its children: `id` when
    /// declared, otherwise the first id field.
    pub fn parent_id_field(&self) -> Option<&str> {
        self.id_fields
            .iter()
            .find(|f| f.as_str() == "id")
            .or_else(|| self.id_fields.first())
            .map(String::as_str)
    }

    /// Field stamped on child records: `<parent_name>_id`
    pub fn parent_link_field(&self) -> Option<String> {
        self.parent_name.as_ref().map(|p| format!("{}_id", p))
    }

    pub fn placeholder_count(&self) -> usize {
        self.path_template.matches(PLACEHOLDER).count()
    }

    /// Fill the path template with ancestor identifiers, outermost first.
    pub fn render_path(&self, ancestor_ids: &[String]) -> String {
        let mut rendered = String::with_capacity(self.path_template.len());
        let mut ids = ancestor_ids.iter();
        let mut rest = self.path_template.as_str();
        while let Some(pos) = rest.find(PLACEHOLDER) {
            rendered.push_str(&rest[..pos]);
            if let Some(id) = ids.next() {
                rendered.push_str(id);
            }
            rest = &rest[pos + PLACEHOLDER.len()..];
        }
        rendered.push_str(rest);
        rendered
    }

    /// Pre-order walk of this stream and all of its descendants
    pub fn walk(&self) -> Vec<&StreamDefinition> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    pub fn subtree_contains(&self, name: &str) -> bool {
        self.walk().iter().any(|d| d.name == name)
    }

    pub fn has_selected_descendant(&self, selected: &BTreeSet<String>) -> bool {
        self.children
            .iter()
            .flat_map(|c| c.walk())
            .any(|d| selected.contains(&d.name))
    }

    fn has_incremental_descendant(&self) -> bool {
        self.children
            .iter()
            .flat_map(|c| c.walk())
            .any(|d| d.is_incremental())
    }
}

/// Validated, immutable forest of stream definitions in traversal order.
#[derive(Debug, Clone)]
pub struct StreamTree {
    roots: Vec<StreamDefinition>,
}

impl StreamTree {
    /// Build and validate a tree
    pub fn new(roots: Vec<StreamDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        for root in &roots {
            if let Some(parent) = &root.parent_name {
                return Err(TapError::config(format!(
                    "root stream '{}' declares parent '{}'",
                    root.name, parent
                )));
            }
            validate_node(root, 1, &mut names)?;
        }
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[StreamDefinition] {
        &self.roots
    }

    /// Every stream in depth-first traversal order
    pub fn iter(&self) -> impl Iterator<Item = &StreamDefinition> {
        self.roots.iter().flat_map(|r| r.walk())
    }

    pub fn find(&self, name: &str) -> Option<&StreamDefinition> {
        self.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|d| d.name.as_str()).collect()
    }
}

fn validate_node(
    def: &StreamDefinition,
    depth: usize,
    names: &mut HashSet<String>,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(TapError::config(format!(
            "stream '{}' is nested {} levels deep (max {})",
            def.name, depth, MAX_TREE_DEPTH
        )));
    }
    if def.name.is_empty() {
        return Err(TapError::config("stream with an empty name"));
    }
    if !names.insert(def.name.clone()) {
        return Err(TapError::config(format!(
            "stream '{}' is declared more than once",
            def.name
        )));
    }

    match (&def.bookmark_field, def.bookmark_type) {
        (Some(field), None) => {
            return Err(TapError::config(format!(
                "stream '{}' bookmarks on '{}' without a bookmark type",
                def.name, field
            )));
        },
        (None, Some(kind)) => {
            return Err(TapError::config(format!(
                "stream '{}' declares a {} bookmark type without a bookmark field",
                def.name, kind
            )));
        },
        _ => {},
    }
    if def.bookmark_query_field.is_some() && def.bookmark_field.is_none() {
        return Err(TapError::config(format!(
            "stream '{}' has a bookmark query field but no bookmark field",
            def.name
        )));
    }
    if def.is_incremental() && def.has_incremental_descendant() {
        return Err(TapError::config(format!(
            "stream '{}' is incremental but its bookmark node also holds child bookmarks",
            def.name
        )));
    }

    if def.placeholder_count() > depth - 1 {
        return Err(TapError::config(format!(
            "path '{}' of stream '{}' has {} placeholders but only {} ancestors",
            def.path_template,
            def.name,
            def.placeholder_count(),
            depth - 1
        )));
    }
    if !def.children.is_empty() && def.parent_id_field().is_none() {
        return Err(TapError::config(format!(
            "stream '{}' has children but no id field to pass to them",
            def.name
        )));
    }

    for child in &def.children {
        if child.parent_name.is_none() {
            return Err(TapError::config(format!(
                "child stream '{}' of '{}' has no parent name",
                child.name, def.name
            )));
        }
        validate_node(child, depth + 1, names)?;
    }
    Ok(())
}

/// The 3PL Central streams, scoped to the configured customer and facility.
pub fn default_tree(config: &TapConfig) -> Result<StreamTree> {
    let modified = "ReadOnly.lastModifiedDate";

    StreamTree::new(vec![
        StreamDefinition::new("inventory", "inventory")
            .param("pgsiz", "200")
            .param("sort", "receivedDate")
            .id_fields(["receive_item_id"]),
        StreamDefinition::new(
            "locations",
            format!("inventory/facilities/{}/locations", config.facility_id),
        )
        .param("pgsiz", "200")
        .id_fields(["facility_id", "location_id"])
        .derive(derive_location_ids),
        StreamDefinition::new("stock_summaries", "inventory/stocksummaries")
            .param("pgsiz", "200")
            .param("facilityid", config.facility_id.as_str())
            .data_key("Summaries")
            .id_fields(["facility_id", "item_id"])
            .derive(derive_stock_summary_ids),
        StreamDefinition::new("customers", "customers")
            .param("pgsiz", "100")
            .param("sort", "ReadOnly.CreationDate")
            .id_fields(["customer_id"])
            .child(
                StreamDefinition::new("sku_items", "customers/{}/items")
                    .param("pgsiz", "100")
                    .param("sort", modified)
                    .incremental("last_modified_date", BookmarkType::Datetime)
                    .bookmark_query_field(modified)
                    .id_fields(["item_id"])
                    .parent("customer"),
            )
            .child(
                StreamDefinition::new("stock_details", "inventory/stockdetails")
                    .param("pgsiz", "100")
                    .param("customerid", config.customer_id.as_str())
                    .param("facilityid", config.facility_id.as_str())
                    .param("sort", "receivedDate")
                    .id_fields(["receive_item_id"])
                    .parent("customer"),
            ),
        StreamDefinition::new("orders", "orders")
            .param("pgsiz", "200")
            .param("detail", "All")
            .param("itemdetail", "All")
            .param("sort", modified)
            .incremental("last_modified_date", BookmarkType::Datetime)
            .bookmark_query_field(modified)
            .id_fields(["order_id"]),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn customers_tree() -> Vec<StreamDefinition> {
        vec![StreamDefinition::new("customers", "customers")
            .id_fields(["customer_id"])
            .child(
                StreamDefinition::new("sku_items", "customers/{}/items")
                    .incremental("last_modified_date", BookmarkType::Datetime)
                    .id_fields(["item_id"])
                    .parent("customer"),
            )]
    }

    #[test]
    fn test_default_tree_is_valid() {
        let config = TapConfig::for_tests();
        let tree = default_tree(&config).unwrap();
        assert_eq!(
            tree.names(),
            vec![
                "inventory",
                "locations",
                "stock_summaries",
                "customers",
                "sku_items",
                "stock_details",
                "orders"
            ]
        );
        let locations = tree.find("locations").unwrap();
        assert_eq!(locations.path_template, "inventory/facilities/7/locations");
        assert_eq!(tree.find("stock_summaries").unwrap().data_key, "Summaries");
    }

    #[test]
    fn test_bookmark_field_requires_type() {
        let mut roots = customers_tree();
        roots[0].children[0].bookmark_type = None;
        let err = StreamTree::new(roots).unwrap_err();
        assert!(matches!(err, TapError::Config(msg) if msg.contains("without a bookmark type")));
    }

    #[test]
    fn test_query_field_requires_bookmark_field() {
        let roots = vec![StreamDefinition::new("orders", "orders").bookmark_query_field("x")];
        assert!(StreamTree::new(roots).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let roots = vec![
            StreamDefinition::new("orders", "orders"),
            StreamDefinition::new("orders", "orders/archive"),
        ];
        assert!(StreamTree::new(roots).is_err());
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut node = StreamDefinition::new("s5", "a/{}/b/{}/c/{}/d/{}").parent("s4");
        for level in (1..=4).rev() {
            let mut parent = StreamDefinition::new(format!("s{}", level), "x").id_fields(["id"]);
            if level > 1 {
                parent = parent.parent(format!("s{}", level - 1));
            }
            node = parent.child(node);
        }
        let err = StreamTree::new(vec![node]).unwrap_err();
        assert!(err.to_string().contains("levels deep"));
    }

    #[test]
    fn test_placeholders_need_ancestors() {
        let roots = vec![StreamDefinition::new("items", "customers/{}/items")];
        assert!(StreamTree::new(roots).is_err());
    }

    #[test]
    fn test_child_requires_parent_name() {
        let mut roots = customers_tree();
        roots[0].children[0].parent_name = None;
        assert!(StreamTree::new(roots).is_err());
    }

    #[test]
    fn test_incremental_parent_of_incremental_child_rejected() {
        let mut roots = customers_tree();
        roots[0] = roots[0]
            .clone()
            .incremental("creation_date", BookmarkType::Datetime);
        assert!(StreamTree::new(roots).is_err());
    }

    #[test]
    fn test_render_path_and_parent_fields() {
        let tree = StreamTree::new(customers_tree()).unwrap();
        let items = tree.find("sku_items").unwrap();
        assert_eq!(items.render_path(&["42".to_string()]), "customers/42/items");
        assert_eq!(items.parent_link_field().as_deref(), Some("customer_id"));

        let with_id = StreamDefinition::new("x", "x").id_fields(["facility_id", "id"]);
        assert_eq!(with_id.parent_id_field(), Some("id"));
        let without_id = StreamDefinition::new("y", "y").id_fields(["facility_id", "location_id"]);
        assert_eq!(without_id.parent_id_field(), Some("facility_id"));
    }

    #[test]
    fn test_selection_helpers() {
        let tree = StreamTree::new(customers_tree()).unwrap();
        let customers = tree.find("customers").unwrap();
        let selected: BTreeSet<String> = ["sku_items".to_string()].into();
        assert!(customers.has_selected_descendant(&selected));
        assert!(customers.subtree_contains("sku_items"));
        assert!(!customers.subtree_contains("orders"));
        assert_eq!(customers.page_size(), DEFAULT_PAGE_SIZE);
    }
}
