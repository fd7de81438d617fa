//! XPathSelect query builder.
//!
//! A [`Query`] is an immutable chain of selection steps. Each step carries an
//! operation (`/` for child, `//` for descendant), a node name and a set of
//! equality filters. Filters the remote side understands are rendered into the
//! wire query; the rest are kept aside and applied locally once rows come back.
//!
//! ```
//! use widgetprobe::{filters, Query};
//!
//! let query = Query::root("Calculator")
//!     .unwrap()
//!     .select_child("QPushButton", filters! { "visible" => true })
//!     .unwrap();
//! assert_eq!(query.server_query_bytes(), b"/Calculator/QPushButton[visible=True]");
//! ```

use crate::result::{ProbeError, ProbeResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Node name matching any type
pub const WILDCARD: &str = "*";

/// Node name selecting the parent of the previous step
pub const PARENT: &str = "..";

// =============================================================================
// FILTER VALUES
// =============================================================================

/// Value of an equality filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number, always matched client-side
    Float(f64),
    /// Text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl FilterValue {
    /// Whether the remote query engine can evaluate this value
    #[must_use]
    pub fn is_server_representable(&self) -> bool {
        match self {
            Self::Bool(_) => true,
            Self::Int(value) => i32::try_from(*value).is_ok(),
            Self::Float(_) => false,
            Self::Text(text) => text.is_ascii(),
            Self::Bytes(bytes) => bytes.is_ascii(),
        }
    }

    /// Render the value the way it appears inside a wire filter clause
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => format!("{value:?}"),
            Self::Text(text) => format!("\"{}\"", escape_text(text)),
            Self::Bytes(bytes) => format!("\"{}\"", escape_bytes(bytes)),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::Text(text) => write!(f, "'{}'", text.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Bytes(bytes) => write!(f, "b'{}'", escape_bytes(bytes)),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<&[u8]> for FilterValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for FilterValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

// =============================================================================
// FILTER SETS
// =============================================================================

/// Equality filters keyed by attribute name, iterated in key order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
    /// Create an empty filter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a filter
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a filter value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.0.get(key)
    }

    /// Whether a filter with this key exists
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over `(key, value)` in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of filters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no filters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn split(self) -> (Self, Self) {
        let (server, client): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .0
            .into_iter()
            .partition(|(key, value)| is_server_side_filter(key, value));
        (Self(server), Self(client))
    }
}

impl fmt::Display for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{key}': {value}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<FilterValue>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Filters {
    type Item = (&'a String, &'a FilterValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, FilterValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build a [`Filters`] set from `key => value` pairs.
///
/// ```
/// use widgetprobe::filters;
///
/// let filters = filters! { "objectName" => "okButton", "visible" => true };
/// assert_eq!(filters.len(), 2);
/// ```
#[macro_export]
macro_rules! filters {
    () => {
        $crate::query::Filters::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::query::Filters::new()$(.with($key, $value))+
    };
}

fn server_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_\-]+( [a-zA-Z0-9_\-])*$").expect("filter key pattern is valid")
    })
}

fn is_server_side_filter(key: &str, value: &FilterValue) -> bool {
    server_key_pattern().is_match(key) && value.is_server_representable()
}

fn escape_char(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\'' => out.push_str("\\'"),
        '"' => out.push_str("\\\""),
        ' '..='~' => out.push(c),
        c if (c as u32) < 0x100 => out.push_str(&format!("\\x{:02x}", c as u32)),
        c if (c as u32) < 0x1_0000 => out.push_str(&format!("\\u{:04x}", c as u32)),
        c => out.push_str(&format!("\\U{:08x}", c as u32)),
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        escape_char(&mut out, c);
    }
    out
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        escape_char(&mut out, char::from(b));
    }
    out
}

// =============================================================================
// QUERY
// =============================================================================

/// Selection operation of a query step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Application root
    Root,
    /// Direct child of the previous step
    Child,
    /// Any descendant of the previous step
    Descendant,
}

impl Operation {
    /// Wire marker preceding the node name
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Root | Self::Child => "/",
            Self::Descendant => "//",
        }
    }
}

/// An immutable XPathSelect query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    parent: Option<Arc<Query>>,
    operation: Operation,
    node: String,
    server_filters: Filters,
    client_filters: Filters,
}

impl Query {
    /// Create a query step below `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] when the combination is not
    /// expressible: extending a client-filtered or pseudo-root query, a
    /// filtered or non-child parent selection, an unfiltered wildcard
    /// descendant search, or a non-ASCII node name.
    pub fn new(
        parent: Option<Arc<Query>>,
        operation: Operation,
        node: &str,
        filters: Filters,
    ) -> ProbeResult<Self> {
        if !node.is_ascii() {
            return Err(ProbeError::invalid_query(format!(
                "Type name '{node}', must be ASCII encodable"
            )));
        }
        if let Some(parent) = &parent {
            if parent.needs_client_side_filtering() {
                return Err(ProbeError::invalid_query(
                    "Cannot create a new query from a parent that requires client-side filter processing.",
                ));
            }
            if parent.is_pseudo_tree_root() {
                return Err(ProbeError::invalid_query(
                    "Cannot select children from a pseudo-tree-root query.",
                ));
            }
        }
        if node == PARENT {
            if !filters.is_empty() {
                return Err(ProbeError::invalid_query(
                    "Cannot specify filters while selecting a parent",
                ));
            }
            if operation != Operation::Child {
                return Err(ProbeError::invalid_query(
                    "Operation must be CHILD while selecting a parent",
                ));
            }
        }

        let (server_filters, client_filters) = filters.split();
        if operation == Operation::Descendant && node == WILDCARD && server_filters.is_empty() {
            return Err(ProbeError::invalid_query(
                "Must provide at least one server-side filter when searching for descendants and using a wildcard node.",
            ));
        }

        Ok(Self {
            parent,
            operation,
            node: node.to_string(),
            server_filters,
            client_filters,
        })
    }

    /// Query selecting the application root named `app_name`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] if `app_name` is not ASCII
    pub fn root(app_name: &str) -> ProbeResult<Self> {
        Self::new(None, Operation::Root, app_name, Filters::new())
    }

    /// Query that re-selects the object at `path` with the given `id`.
    ///
    /// The id filter is attached to the last node only.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] if `path` is not absolute, has no
    /// nodes, or is not ASCII
    pub fn new_from_path_and_id(path: impl AsRef<[u8]>, id: i64) -> ProbeResult<Self> {
        let path = path.as_ref();
        let text = std::str::from_utf8(path).map_err(|_| {
            ProbeError::invalid_query(format!("Invalid path '{}'.", String::from_utf8_lossy(path)))
        })?;
        let nodes: Vec<&str> = text.split('/').filter(|n| !n.is_empty()).collect();
        if !text.starts_with('/') || nodes.is_empty() {
            return Err(ProbeError::invalid_query(format!("Invalid path '{text}'.")));
        }

        let last = nodes.len() - 1;
        let mut query: Option<Self> = None;
        for (i, node) in nodes.into_iter().enumerate() {
            let filters = if i == last {
                Filters::new().with("id", id)
            } else {
                Filters::new()
            };
            query = Some(match query {
                None => Self::new(None, Operation::Root, node, filters)?,
                Some(parent) => Self::new(Some(Arc::new(parent)), Operation::Child, node, filters)?,
            });
        }
        query.ok_or_else(|| ProbeError::invalid_query(format!("Invalid path '{text}'.")))
    }

    /// Query for the tree root when its name is unknown.
    ///
    /// Renders as `/` and cannot be extended.
    #[must_use]
    pub fn pseudo_tree_root() -> Self {
        Self {
            parent: None,
            operation: Operation::Child,
            node: String::new(),
            server_filters: Filters::new(),
            client_filters: Filters::new(),
        }
    }

    /// Search the whole tree for `name` nodes.
    ///
    /// This walks every object in the application and can be slow on large
    /// trees; prefer a search rooted at a nearby object.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] on a wildcard without server-side
    /// filters or a non-ASCII name
    pub fn whole_tree_search(name: &str, filters: Filters) -> ProbeResult<Self> {
        Self::new(None, Operation::Descendant, name, filters)
    }

    /// Select direct children named `name`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] if this query cannot be extended
    pub fn select_child(&self, name: &str, filters: Filters) -> ProbeResult<Self> {
        Self::new(Some(Arc::new(self.clone())), Operation::Child, name, filters)
    }

    /// Select descendants named `name`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] if this query cannot be extended
    /// or on a wildcard without server-side filters
    pub fn select_descendant(&self, name: &str, filters: Filters) -> ProbeResult<Self> {
        Self::new(
            Some(Arc::new(self.clone())),
            Operation::Descendant,
            name,
            filters,
        )
    }

    /// Select the parent of the nodes this query matches
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidQuery`] if this query cannot be extended
    pub fn select_parent(&self) -> ProbeResult<Self> {
        Self::new(
            Some(Arc::new(self.clone())),
            Operation::Child,
            PARENT,
            Filters::new(),
        )
    }

    /// Whether this step or any ancestor has client-side filters
    #[must_use]
    pub fn needs_client_side_filtering(&self) -> bool {
        !self.client_filters.is_empty()
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.needs_client_side_filtering())
    }

    /// Client-side filters of this step only
    #[must_use]
    pub fn get_client_side_filters(&self) -> &Filters {
        &self.client_filters
    }

    /// Server-side filters of this step only
    #[must_use]
    pub fn server_filters(&self) -> &Filters {
        &self.server_filters
    }

    /// Parent step, if any
    #[must_use]
    pub fn parent(&self) -> Option<&Query> {
        self.parent.as_deref()
    }

    /// Operation of this step
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Node name of this step
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node
    }

    /// Wire query for the remote side
    #[must_use]
    pub fn server_query_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        self.write_wire(&mut out);
        out.into_bytes()
    }

    fn write_wire(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.write_wire(out);
        }
        out.push_str(self.operation.marker());
        out.push_str(&self.node);
        if !self.server_filters.is_empty() {
            out.push('[');
            for (i, (key, value)) in self.server_filters.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push('=');
                out.push_str(&value.to_wire());
            }
            out.push(']');
        }
    }

    fn is_pseudo_tree_root(&self) -> bool {
        self.parent.is_none()
            && self.operation != Operation::Descendant
            && self.node.is_empty()
            && self.server_filters.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query(b\"{}\")", escape_bytes(&self.server_query_bytes()))
    }
}

/// Type name of the object at `path` (the last path segment)
#[must_use]
pub fn get_classname_from_path(path: &[u8]) -> String {
    let last = path.rsplit(|&b| b == b'/').next().unwrap_or_default();
    String::from_utf8_lossy(last).into_owned()
}

/// Name of the tree root in `path` (the first path segment)
#[must_use]
pub fn get_path_root(path: &[u8]) -> String {
    let root = path.split(|&b| b == b'/').nth(1).unwrap_or_default();
    String::from_utf8_lossy(root).into_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::filters;

    fn wire(query: &Query) -> String {
        String::from_utf8(query.server_query_bytes()).unwrap()
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn test_root() {
            let query = Query::root("Foo").unwrap();
            assert_eq!(wire(&query), "/Foo");
            assert_eq!(query.operation(), Operation::Root);
            assert!(query.parent().is_none());
        }

        #[test]
        fn test_root_rejects_non_ascii() {
            let err = Query::root("Fööbar").unwrap_err();
            assert!(matches!(err, ProbeError::InvalidQuery { .. }));
            assert!(err.to_string().contains("must be ASCII encodable"));
        }

        #[test]
        fn test_child_with_filter() {
            let query = Query::root("Foo")
                .unwrap()
                .select_child("Bar", filters! { "visible" => true })
                .unwrap();
            assert_eq!(wire(&query), "/Foo/Bar[visible=True]");
        }

        #[test]
        fn test_descendant() {
            let query = Query::root("Foo")
                .unwrap()
                .select_descendant("Bar", Filters::new())
                .unwrap();
            assert_eq!(wire(&query), "/Foo//Bar");
        }

        #[test]
        fn test_parent() {
            let query = Query::root("Foo")
                .unwrap()
                .select_child("Bar", Filters::new())
                .unwrap()
                .select_parent()
                .unwrap();
            assert_eq!(wire(&query), "/Foo/Bar/..");
        }

        #[test]
        fn test_parent_with_filters_rejected() {
            let parent = Arc::new(Query::root("Foo").unwrap());
            let err = Query::new(Some(parent), Operation::Child, PARENT, filters! { "a" => 1 })
                .unwrap_err();
            assert!(err.to_string().contains("Cannot specify filters"));
        }

        #[test]
        fn test_parent_requires_child_operation() {
            let parent = Arc::new(Query::root("Foo").unwrap());
            let err = Query::new(Some(parent), Operation::Descendant, PARENT, Filters::new())
                .unwrap_err();
            assert!(err.to_string().contains("Operation must be CHILD"));
        }

        #[test]
        fn test_wildcard_descendant_needs_server_filter() {
            let root = Query::root("Foo").unwrap();
            assert!(root.select_descendant(WILDCARD, Filters::new()).is_err());
            assert!(root
                .select_descendant(WILDCARD, filters! { "ratio" => 0.5 })
                .is_err());
            let ok = root
                .select_descendant(WILDCARD, filters! { "visible" => true })
                .unwrap();
            assert_eq!(wire(&ok), "/Foo//*[visible=True]");
        }

        #[test]
        fn test_wildcard_child_without_filters() {
            let query = Query::root("Foo")
                .unwrap()
                .select_child(WILDCARD, Filters::new())
                .unwrap();
            assert_eq!(wire(&query), "/Foo/*");
        }

        #[test]
        fn test_whole_tree_search() {
            let query =
                Query::whole_tree_search("Button", filters! { "label" => "OK" }).unwrap();
            assert_eq!(wire(&query), "//Button[label=\"OK\"]");
            assert!(Query::whole_tree_search(WILDCARD, Filters::new()).is_err());
        }
    }

    mod path_tests {
        use super::*;

        #[test]
        fn test_from_path_and_id() {
            let query = Query::new_from_path_and_id(b"/root/child", 42).unwrap();
            assert_eq!(wire(&query), "/root/child[id=42]");
        }

        #[test]
        fn test_from_path_and_id_deep() {
            let query = Query::new_from_path_and_id("/a/b/c/d", 7).unwrap();
            assert_eq!(wire(&query), "/a/b/c/d[id=7]");
        }

        #[test]
        fn test_from_path_single_node() {
            let query = Query::new_from_path_and_id("/root", 1).unwrap();
            assert_eq!(wire(&query), "/root[id=1]");
        }

        #[test]
        fn test_from_path_collapses_empty_segments() {
            let query = Query::new_from_path_and_id("/a//b/", 3).unwrap();
            assert_eq!(wire(&query), "/a/b[id=3]");
        }

        #[test]
        fn test_relative_path_rejected() {
            let err = Query::new_from_path_and_id("root/child", 1).unwrap_err();
            assert_eq!(err.to_string(), "Invalid query: Invalid path 'root/child'.");
        }

        #[test]
        fn test_empty_path_rejected() {
            assert!(Query::new_from_path_and_id("/", 1).is_err());
            assert!(Query::new_from_path_and_id("", 1).is_err());
        }

        #[test]
        fn test_classname_and_root_from_path() {
            assert_eq!(get_classname_from_path(b"/root/parent/Child"), "Child");
            assert_eq!(get_classname_from_path(b"/root"), "root");
            assert_eq!(get_path_root(b"/root/parent/Child"), "root");
            assert_eq!(get_path_root(b"/root"), "root");
        }
    }

    mod pseudo_root_tests {
        use super::*;

        #[test]
        fn test_renders_slash() {
            assert_eq!(wire(&Query::pseudo_tree_root()), "/");
        }

        #[test]
        fn test_cannot_be_extended() {
            let root = Query::pseudo_tree_root();
            for result in [
                root.select_child("Foo", Filters::new()),
                root.select_descendant("Foo", Filters::new()),
                root.select_parent(),
            ] {
                let err = result.unwrap_err();
                assert!(err.to_string().contains("pseudo-tree-root"));
            }
        }
    }

    mod filter_tests {
        use super::*;

        #[test]
        fn test_keys_sorted() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "zeta" => 1, "alpha" => false, "mid" => "x" })
                .unwrap();
            assert_eq!(wire(&query), "/App/W[alpha=False,mid=\"x\",zeta=1]");
        }

        #[test]
        fn test_float_is_client_side() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "opacity" => 0.5, "visible" => true })
                .unwrap();
            assert_eq!(wire(&query), "/App/W[visible=True]");
            assert!(query.needs_client_side_filtering());
            assert_eq!(
                query.get_client_side_filters().get("opacity"),
                Some(&FilterValue::Float(0.5))
            );
        }

        #[test]
        fn test_non_ascii_text_is_client_side() {
            let query = Query::root("App")
                .unwrap()
                .select_child("Label", filters! { "text" => "héllo" })
                .unwrap();
            assert_eq!(wire(&query), "/App/Label");
            assert!(query.needs_client_side_filtering());
        }

        #[test]
        fn test_out_of_range_int_is_client_side() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "big" => 1_i64 << 40, "small" => -5 })
                .unwrap();
            assert_eq!(wire(&query), "/App/W[small=-5]");
            assert!(query.get_client_side_filters().contains_key("big"));
        }

        #[test]
        fn test_invalid_key_is_client_side() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "bad.key" => 1, "two words" => 2, "a b" => 3 })
                .unwrap();
            assert_eq!(wire(&query), "/App/W[a b=3]");
            let client = query.get_client_side_filters();
            assert!(client.contains_key("bad.key"));
            assert!(client.contains_key("two words"));
        }

        #[test]
        fn test_cannot_extend_client_filtered_query() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "opacity" => 0.5 })
                .unwrap();
            let err = query.select_child("X", Filters::new()).unwrap_err();
            assert!(err.to_string().contains("client-side filter"));
            assert!(query.select_parent().is_err());
        }

        #[test]
        fn test_client_filters_are_per_step() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "visible" => true })
                .unwrap();
            assert!(!query.needs_client_side_filtering());
            assert!(query.get_client_side_filters().is_empty());
        }

        #[test]
        fn test_string_escaping() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "text" => "a\"b'c\\d\n\t\u{7}" })
                .unwrap();
            assert_eq!(
                wire(&query),
                "/App/W[text=\"a\\\"b\\'c\\\\d\\n\\t\\x07\"]"
            );
        }

        #[test]
        fn test_bytes_value() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "name" => b"raw".as_slice() })
                .unwrap();
            assert_eq!(wire(&query), "/App/W[name=\"raw\"]");
        }

        #[test]
        fn test_filters_display() {
            let filters = filters! { "b" => "x", "a" => 1, "c" => false };
            assert_eq!(filters.to_string(), "{'a': 1, 'b': 'x', 'c': False}");
            assert_eq!(Filters::new().to_string(), "{}");
        }
    }

    mod display_tests {
        use super::*;

        #[test]
        fn test_query_display() {
            let query = Query::root("App")
                .unwrap()
                .select_child("W", filters! { "label" => "go" })
                .unwrap();
            assert_eq!(query.to_string(), "Query(b\"/App/W[label=\\\"go\\\"]\")");
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn node_name() -> impl Strategy<Value = String> {
            "[A-Za-z][A-Za-z0-9_]{0,12}"
        }

        fn key() -> impl Strategy<Value = String> {
            "[a-z][a-zA-Z0-9_]{0,8}"
        }

        proptest! {
            #[test]
            fn prop_child_renders_sorted_filters(
                app in node_name(),
                child in node_name(),
                entries in proptest::collection::btree_map(key(), any::<i32>(), 0..5),
            ) {
                let filters: Filters = entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
                let query = Query::root(&app).unwrap().select_child(&child, filters).unwrap();
                let mut expected = format!("/{app}/{child}");
                if !entries.is_empty() {
                    let rendered: Vec<String> =
                        entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    expected.push_str(&format!("[{}]", rendered.join(",")));
                }
                prop_assert_eq!(wire(&query), expected);
                prop_assert!(!query.needs_client_side_filtering());
            }

            #[test]
            fn prop_floats_never_reach_server(
                child in node_name(),
                k in key(),
                value in any::<f64>(),
            ) {
                let query = Query::root("App")
                    .unwrap()
                    .select_child(&child, Filters::new().with(k.clone(), value))
                    .unwrap();
                prop_assert_eq!(wire(&query), format!("/App/{child}"));
                prop_assert!(query.needs_client_side_filtering());
                prop_assert!(query.select_child("X", Filters::new()).is_err());
            }

            #[test]
            fn prop_path_and_id_roundtrip(
                nodes in proptest::collection::vec(node_name(), 1..6),
                id in any::<i32>(),
            ) {
                let path = format!("/{}", nodes.join("/"));
                let query = Query::new_from_path_and_id(&path, i64::from(id)).unwrap();
                prop_assert_eq!(wire(&query), format!("{path}[id={id}]"));
            }
        }
    }
}
