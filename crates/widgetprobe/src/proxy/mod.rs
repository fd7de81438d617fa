//! Proxy objects.
//!
//! A [`ProxyObject`] mirrors one object in the application under test. It
//! caches the object's attributes and refreshes them from the backend on
//! every attribute read, unless refreshing is suspended with
//! [`ProxyObject::no_automatic_refreshing`]. Navigation methods build new
//! queries rooted at the object's own query and hand them to the backend.
//!
//! ```text
//! Fresh ──get()──► Refreshing ──rows──► Fresh
//!                      │
//!                      └──no rows──► Destroyed (StateNotFound)
//! ```

mod parent;
mod qt;
mod select;
mod shape;
mod tree;
mod wait;

pub use qt::{QtProxy, QtSignalWatcher};
pub use shape::Shape;

use crate::backend::{Backend, Row, StateMap};
use crate::filters;
use crate::query::{Filters, Query};
use crate::registry::{Capability, Identity, ProxyClass};
use crate::result::{ProbeError, ProbeResult};
use crate::search::ProcessHandle;
use crate::value::PropertyValue;
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute map of a proxy object, keyed by translated attribute name
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Clone)]
struct ApplicationInfo {
    pid: u32,
    process: Option<Arc<dyn ProcessHandle>>,
}

/// Client-side mirror of one remote object
pub struct ProxyObject {
    id: i64,
    path: Vec<u8>,
    query: Query,
    class: Arc<ProxyClass>,
    identity: Identity,
    backend: Backend,
    state: RefCell<Properties>,
    refresh_suspended: Cell<usize>,
    application: OnceCell<ApplicationInfo>,
}

impl ProxyObject {
    /// Build a proxy from a raw state row.
    ///
    /// Attribute names have `-` replaced by `_`. An attribute whose value
    /// cannot be decoded is logged and left out.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidArgument`] if the state has no usable
    /// `id`, and [`ProbeError::InvalidQuery`] if `path` is not a valid
    /// object path
    pub fn new(
        state: StateMap,
        path: Vec<u8>,
        class: Arc<ProxyClass>,
        identity: Identity,
        backend: Backend,
    ) -> ProbeResult<Self> {
        let id = state_id(&state)?;
        let query = Query::new_from_path_and_id(&path, id)?;
        let properties = decode_state(&state, class.name());
        Ok(Self {
            id,
            path,
            query,
            class,
            identity,
            backend,
            state: RefCell::new(properties),
            refresh_suspended: Cell::new(0),
            application: OnceCell::new(),
        })
    }

    /// Object id, unique within the application
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Absolute object path
    #[must_use]
    pub fn get_path(&self) -> String {
        String::from_utf8_lossy(&self.path).into_owned()
    }

    /// Absolute object path as bytes
    #[must_use]
    pub fn path_bytes(&self) -> &[u8] {
        &self.path
    }

    /// Query that re-selects this object
    #[must_use]
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Resolved proxy class
    #[must_use]
    pub const fn class(&self) -> &Arc<ProxyClass> {
        &self.class
    }

    /// Name of the resolved proxy class
    #[must_use]
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// Identity of the emulator base this object was resolved under
    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Backend serving this object
    #[must_use]
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Whether this object's class is `class` or derives from it
    #[must_use]
    pub fn is_instance_of(&self, class: &Arc<ProxyClass>) -> bool {
        self.class.is_subclass_of(class)
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Read an attribute, refreshing the state first unless refreshing is
    /// suspended
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::AttributeNotFound`] for an unknown name and
    /// [`ProbeError::StateNotFound`] if the object was destroyed
    pub fn get(&self, name: &str) -> ProbeResult<PropertyValue> {
        if name == "id" {
            return Ok(PropertyValue::Int(self.id));
        }
        if !self.state.borrow().contains_key(name) {
            return Err(self.attribute_not_found(name));
        }
        if self.refresh_suspended.get() == 0 {
            self.refresh_state()?;
        }
        self.state
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| self.attribute_not_found(name))
    }

    /// Every attribute, freshly read, plus `id`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StateNotFound`] if the object was destroyed
    pub fn get_properties(&self) -> ProbeResult<Properties> {
        self.refresh_state()?;
        Ok(self.cached_properties())
    }

    /// Cached attributes plus `id`, without a round trip
    #[must_use]
    pub fn cached_properties(&self) -> Properties {
        let mut properties = self.state.borrow().clone();
        properties.insert("id".to_string(), PropertyValue::Int(self.id));
        properties
    }

    /// Re-read this object's state from the application
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StateNotFound`] if the object was destroyed
    pub fn refresh_state(&self) -> ProbeResult<()> {
        let row = self.get_new_state()?;
        *self.state.borrow_mut() = decode_state(&row.state, self.class.name());
        Ok(())
    }

    /// Fetch this object's current row without updating the cache.
    ///
    /// Attribute names in the returned row are not translated.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StateNotFound`] if the object was destroyed
    pub fn get_new_state(&self) -> ProbeResult<Row> {
        self.backend
            .execute_query_get_data(&self.query)?
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::not_found(Some(self.class.name()), &filters! { "id" => self.id }))
    }

    /// Suspend automatic refreshing until the guard drops.
    ///
    /// Guards nest; refreshing resumes when the last one drops.
    #[must_use]
    pub fn no_automatic_refreshing(&self) -> NoRefreshGuard<'_> {
        self.refresh_suspended.set(self.refresh_suspended.get() + 1);
        NoRefreshGuard { object: self }
    }

    /// Whether attribute reads currently refresh the state
    #[must_use]
    pub fn refreshes_automatically(&self) -> bool {
        self.refresh_suspended.get() == 0
    }

    fn replace_state(&self, state: &StateMap) {
        *self.state.borrow_mut() = decode_state(state, self.class.name());
    }

    fn attribute_not_found(&self, name: &str) -> ProbeError {
        ProbeError::AttributeNotFound {
            class_name: self.class.name().to_string(),
            name: name.to_string(),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    fn execute_query(&self, query: &Query) -> ProbeResult<Vec<ProxyObject>> {
        self.backend
            .execute_query_get_proxy_instances(query, self.identity)
    }

    /// Every object in the application whose type is this object's class
    ///
    /// # Errors
    ///
    /// Propagates query and transport errors
    pub fn get_all_instances(&self) -> ProbeResult<Vec<ProxyObject>> {
        let query = Query::whole_tree_search(self.class.type_query_name(), Filters::new())?;
        self.execute_query(&query)
    }

    /// The object at the root of the tree
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::StateNotFound`] if the tree is empty
    pub fn get_root_instance(&self) -> ProbeResult<ProxyObject> {
        self.execute_query(&Query::pseudo_tree_root())?
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::not_found(None, &Filters::new()))
    }

    // =========================================================================
    // APPLICATION ROOT
    // =========================================================================

    pub(crate) fn attach_application(&self, pid: u32, process: Option<Arc<dyn ProcessHandle>>) {
        // Only the first attachment counts.
        let _ = self.application.set(ApplicationInfo { pid, process });
    }

    fn application_info(&self) -> ProbeResult<&ApplicationInfo> {
        let unavailable = || ProbeError::CapabilityUnavailable {
            class_name: self.class.name().to_string(),
            capability: Capability::Application.to_string(),
        };
        if !self.class.has_capability(Capability::Application) {
            return Err(unavailable());
        }
        self.application.get().ok_or_else(unavailable)
    }

    /// Pid of the application this root object belongs to
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::CapabilityUnavailable`] on objects that are not
    /// application roots
    pub fn pid(&self) -> ProbeResult<u32> {
        self.application_info().map(|info| info.pid)
    }

    /// Handle to the application process, when the search was given one
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::CapabilityUnavailable`] on objects that are not
    /// application roots
    pub fn process(&self) -> ProbeResult<Option<Arc<dyn ProcessHandle>>> {
        self.application_info().map(|info| info.process.clone())
    }
}

impl fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyObject")
            .field("class", &self.class.name())
            .field("id", &self.id)
            .field("path", &self.get_path())
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`ProxyObject::no_automatic_refreshing`]
#[derive(Debug)]
pub struct NoRefreshGuard<'a> {
    object: &'a ProxyObject,
}

impl Drop for NoRefreshGuard<'_> {
    fn drop(&mut self) {
        let depth = self.object.refresh_suspended.get();
        self.object.refresh_suspended.set(depth.saturating_sub(1));
    }
}

fn state_id(state: &StateMap) -> ProbeResult<i64> {
    state
        .get("id")
        .and_then(|wire| wire.get(1))
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| {
            ProbeError::invalid_argument("State dictionary does not contain required 'id' key.")
        })
}

fn decode_state(state: &StateMap, class_name: &str) -> Properties {
    let mut properties = Properties::new();
    for (key, wire) in state {
        let name = key.replace('-', "_");
        if name == "id" {
            continue;
        }
        match PropertyValue::from_wire(wire) {
            Ok(value) => {
                properties.insert(name, value);
            }
            Err(err) => {
                tracing::warn!("While constructing attribute '{}.{}': {}", class_name, name, err);
            }
        }
    }
    properties
}
