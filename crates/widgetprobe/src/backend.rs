//! Backend: executes queries against one introspection address.
//!
//! The [`IpcAddress`] trait is the transport seam. A D-Bus implementation
//! lives behind the `dbus` feature and [`crate::fake`] provides a scripted
//! one for tests. [`Backend`] turns query results into [`ProxyObject`]s,
//! resolving their classes through the context's registry and applying any
//! filters the remote side could not evaluate.

use crate::context::ProbeContext;
use crate::proxy::ProxyObject;
use crate::query::Query;
use crate::registry::Identity;
use crate::result::{ProbeError, ProbeResult, TransportError};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Raw attribute map of one remote object
pub type StateMap = serde_json::Map<String, Value>;

/// Version assumed for peers that do not answer `GetVersion`
pub const LEGACY_PROTOCOL_VERSION: &str = "1.2";

/// One query result: object path plus raw state
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Absolute object path
    pub path: Vec<u8>,
    /// Raw attributes, each `[type_id, component...]`
    pub state: StateMap,
}

impl Row {
    /// Build a row from a path and a JSON object; other JSON values give an
    /// empty state
    #[must_use]
    pub fn new(path: impl Into<Vec<u8>>, state: Value) -> Self {
        let state = match state {
            Value::Object(map) => map,
            _ => StateMap::new(),
        };
        Self {
            path: path.into(),
            state,
        }
    }
}

/// Hashable identification of an address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey {
    /// Bus description (`session`, `system` or a custom address)
    pub bus: String,
    /// Connection name on the bus
    pub connection: String,
    /// Object path exporting the introspection interface
    pub object_path: String,
}

impl AddressKey {
    /// Create an address key
    #[must_use]
    pub fn new(
        bus: impl Into<String>,
        connection: impl Into<String>,
        object_path: impl Into<String>,
    ) -> Self {
        Self {
            bus: bus.into(),
            connection: connection.into(),
            object_path: object_path.into(),
        }
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.bus, self.connection, self.object_path)
    }
}

/// Transport to one object exporting the introspection interface
pub trait IpcAddress: fmt::Debug + Send + Sync {
    /// Run a wire query and return the matching rows
    fn get_state(&self, query: &[u8]) -> Result<Vec<Row>, TransportError>;

    /// Identification of this address
    fn key(&self) -> AddressKey;

    /// Introspection XML of the exported object
    fn introspect(&self) -> Result<String, TransportError>;

    /// Wire protocol version spoken by the peer
    fn get_version(&self) -> Result<String, TransportError>;

    /// Qt extension interface, if the peer exports one
    fn qt(&self) -> Option<&dyn QtInterface> {
        None
    }
}

/// Qt extension interface
pub trait QtInterface {
    /// Signals exported by an object
    fn list_signals(&self, object_id: i64) -> Result<Vec<String>, TransportError>;

    /// Methods and slots exported by an object
    fn list_methods(&self, object_id: i64) -> Result<Vec<String>, TransportError>;

    /// Invoke a method or slot
    fn invoke_method(
        &self,
        object_id: i64,
        method: &str,
        args: &[Value],
    ) -> Result<(), TransportError>;

    /// Start counting emissions of a signal
    fn register_signal_interest(&self, object_id: i64, signal: &str)
        -> Result<(), TransportError>;

    /// Emissions counted since interest was registered
    fn get_signal_emissions(&self, object_id: i64, signal: &str) -> Result<i64, TransportError>;
}

struct BackendInner {
    address: Arc<dyn IpcAddress>,
    context: ProbeContext,
    version_checked: AtomicBool,
}

/// Query executor bound to one address; cheap to clone
#[derive(Clone)]
pub struct Backend {
    inner: Arc<BackendInner>,
}

impl Backend {
    /// Create a backend for `address`
    #[must_use]
    pub fn new(address: Arc<dyn IpcAddress>, context: ProbeContext) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                address,
                context,
                version_checked: AtomicBool::new(false),
            }),
        }
    }

    /// The underlying address
    #[must_use]
    pub fn address(&self) -> &Arc<dyn IpcAddress> {
        &self.inner.address
    }

    /// The shared context
    #[must_use]
    pub fn context(&self) -> &ProbeContext {
        &self.inner.context
    }

    /// Check the peer's wire protocol version; runs once per backend
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WireProtocolMismatch`] on a version mismatch
    pub fn check_version(&self) -> ProbeResult<()> {
        if self.inner.version_checked.load(Ordering::SeqCst) {
            return Ok(());
        }
        let expected = &self.context().config().wire_protocol_version;
        let found = self
            .address()
            .get_version()
            .unwrap_or_else(|_| LEGACY_PROTOCOL_VERSION.to_string());
        if &found != expected {
            return Err(ProbeError::WireProtocolMismatch {
                address: self.address().key().to_string(),
                found,
                expected: expected.clone(),
            });
        }
        self.inner.version_checked.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Execute `query` and return the raw rows.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::ApplicationExited`] when the peer left the bus;
    /// other transport errors propagate unchanged
    pub fn execute_query_get_data(&self, query: &Query) -> ProbeResult<Vec<Row>> {
        self.check_version()?;
        let wire = query.server_query_bytes();
        let started = Instant::now();
        let rows = self.address().get_state(&wire).map_err(|err| {
            if err.is_service_unknown() {
                ProbeError::ApplicationExited
            } else {
                ProbeError::Transport(err)
            }
        })?;
        tracing::debug!(
            query = %query,
            rows = rows.len(),
            elapsed = ?started.elapsed(),
            "executed query"
        );
        let threshold = self.context().config().large_result_warning;
        if rows.len() > threshold {
            tracing::warn!(
                "{} returned a lot of data ({} items). This is likely to be slow. You may want to consider optimising your query to return fewer items.",
                query,
                rows.len()
            );
        }
        Ok(rows)
    }

    /// Execute `query` and build proxy objects for the rows.
    ///
    /// Client-side filters are checked against each candidate's cached
    /// state; a missing or unequal attribute excludes the candidate.
    ///
    /// # Errors
    ///
    /// Propagates query, transport and class resolution errors
    pub fn execute_query_get_proxy_instances(
        &self,
        query: &Query,
        identity: Identity,
    ) -> ProbeResult<Vec<ProxyObject>> {
        let rows = self.execute_query_get_data(query)?;
        let objects = rows
            .into_iter()
            .map(|row| self.make_proxy_object(identity, row))
            .collect::<ProbeResult<Vec<_>>>()?;
        if !query.needs_client_side_filtering() {
            return Ok(objects);
        }
        let filters = query.get_client_side_filters();
        Ok(objects
            .into_iter()
            .filter(|object| {
                let _no_refresh = object.no_automatic_refreshing();
                filters.iter().all(|(key, expected)| {
                    object
                        .get(key)
                        .is_ok_and(|actual| actual.matches(expected))
                })
            })
            .collect())
    }

    /// Build the proxy object for one row
    ///
    /// # Errors
    ///
    /// Returns class resolution and construction errors
    pub fn make_proxy_object(&self, identity: Identity, row: Row) -> ProbeResult<ProxyObject> {
        let class = self
            .context()
            .registry()
            .get_proxy_object_class(identity, &row.path, &row.state)?;
        ProxyObject::new(row.state, row.path, class, identity, self.clone())
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("address", &self.address().key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fake::FakeAddress;
    use crate::filters;
    use crate::query::Filters;
    use serde_json::json;

    fn setup(address: FakeAddress) -> (Backend, Identity, Arc<FakeAddress>) {
        let context = ProbeContext::new_mocked();
        let base = context.registry().make_default_emulator_base();
        let address = Arc::new(address);
        let backend = Backend::new(address.clone(), context);
        (backend, base.identity().unwrap(), address)
    }

    fn button(id: i64, label: &str, opacity: f64) -> Row {
        Row::new(
            "/App/Button",
            json!({"id": [0, id], "label": [0, label], "opacity": [0, opacity]}),
        )
    }

    #[test]
    fn test_get_data_sends_wire_query() {
        let (backend, _, address) = setup(FakeAddress::with_rows(vec![button(1, "a", 1.0)]));
        let query = Query::root("App").unwrap().select_child("Button", Filters::new()).unwrap();
        let rows = backend.execute_query_get_data(&query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(address.queries(), vec![b"/App/Button".to_vec()]);
    }

    #[test]
    fn test_service_unknown_becomes_application_exited() {
        let (backend, _, _) = setup(FakeAddress::failing(TransportError::service_unknown(
            "The name :1.42 was not provided by any .service files",
        )));
        let err = backend
            .execute_query_get_data(&Query::pseudo_tree_root())
            .unwrap_err();
        assert!(matches!(err, ProbeError::ApplicationExited));
        assert!(err.to_string().contains("exited before the test finished"));
    }

    #[test]
    fn test_other_transport_errors_propagate() {
        let (backend, _, _) = setup(FakeAddress::failing(TransportError::new(
            "org.freedesktop.DBus.Error.NoReply",
            "timeout",
        )));
        let err = backend
            .execute_query_get_data(&Query::pseudo_tree_root())
            .unwrap_err();
        match err {
            ProbeError::Transport(inner) => assert_eq!(inner.name, "org.freedesktop.DBus.Error.NoReply"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_version_mismatch() {
        let (backend, _, _) = setup(FakeAddress::with_rows(vec![]).with_version(Some("1.3")));
        let err = backend
            .execute_query_get_data(&Query::pseudo_tree_root())
            .unwrap_err();
        assert!(err.to_string().contains("is 1.3, expecting 1.4"));
    }

    #[test]
    fn test_missing_version_counts_as_legacy() {
        let (backend, _, _) = setup(FakeAddress::with_rows(vec![]).with_version(None));
        let err = backend.check_version().unwrap_err();
        assert!(err.to_string().contains("is 1.2"));
    }

    #[test]
    fn test_version_checked_once() {
        let (backend, _, address) = setup(FakeAddress::with_rows(vec![]));
        backend.execute_query_get_data(&Query::pseudo_tree_root()).unwrap();
        backend.execute_query_get_data(&Query::pseudo_tree_root()).unwrap();
        assert_eq!(address.version_calls(), 1);
    }

    #[test]
    fn test_proxy_instances_without_client_filters() {
        let rows = vec![button(1, "a", 1.0), button(2, "b", 0.5)];
        let (backend, identity, _) = setup(FakeAddress::with_rows(rows));
        let query = Query::root("App").unwrap().select_child("Button", Filters::new()).unwrap();
        let objects = backend.execute_query_get_proxy_instances(&query, identity).unwrap();
        assert_eq!(objects.iter().map(ProxyObject::id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(objects[0].class_name(), "Button");
    }

    #[test]
    fn test_client_side_filtering() {
        let rows = vec![
            button(1, "a", 1.0),
            button(2, "b", 0.5),
            Row::new("/App/Button", json!({"id": [0, 3]})),
        ];
        let (backend, identity, address) = setup(FakeAddress::with_rows(rows));
        let query = Query::root("App")
            .unwrap()
            .select_child("Button", filters! { "opacity" => 0.5 })
            .unwrap();
        let objects = backend.execute_query_get_proxy_instances(&query, identity).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id(), 2);
        // filtering must not trigger refreshes
        assert_eq!(address.queries().len(), 1);
    }
}
