//! Connection Search
//!
//! Finds the application under test on the message bus and builds the proxy
//! object for its root.
//!
//! A search takes named parameters (`pid`, `connection_name`,
//! `application_name`, `object_path`), turns each into a [`ConnectionFilter`],
//! and scans the bus once a second until some connections pass every filter
//! or the default timeout runs out. Exactly one connection must remain.
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use widgetprobe::backend::Row;
//! use widgetprobe::fake::{FakeAddress, FakeBus, FakeProcessTable};
//! use widgetprobe::search::{ProcessSearch, SearchParams, SearchRequest};
//! use widgetprobe::ProbeContext;
//!
//! let address = Arc::new(FakeAddress::tree(vec![Row::new("/Editor", json!({"id": [0, 1]}))]));
//! let bus = FakeBus::new().with_connection(":1.7", 4242, Some(address));
//! let search = ProcessSearch::new(
//!     ProbeContext::new_mocked(),
//!     Arc::new(bus),
//!     Arc::new(FakeProcessTable::new(1).with_pid(4242)),
//! );
//! let root = search
//!     .get_proxy_object(SearchRequest::new(SearchParams::new().pid(4242)))
//!     .unwrap();
//! assert_eq!(root.class_name(), "Editor");
//! assert_eq!(root.pid().unwrap(), 4242);
//! ```

pub mod bus;
pub mod filters;
pub mod params;
pub mod process;

pub use bus::{Bus, DAEMON_NAME};
pub use filters::{
    filter_chain, filter_runner, mandatory_filters, ConnectionFilter, FilterLookup, SearchEnv,
};
pub use params::{criteria_string, ParamValue, SearchParams};
pub use process::{ProcessHandle, ProcessTable, SpawnedProcess, SystemProcessTable};

use crate::backend::{Backend, IpcAddress};
use crate::context::ProbeContext;
use crate::proxy::ProxyObject;
use crate::query::{Filters, Query};
use crate::registry::{ProxyClass, Registry};
use crate::result::{ProbeError, ProbeResult};
use crate::timeout::Timeout;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// REQUEST
// =============================================================================

/// One connection search: parameters plus optional typed extras
#[derive(Default)]
pub struct SearchRequest {
    params: SearchParams,
    process: Option<Arc<dyn ProcessHandle>>,
    bus: Option<Arc<dyn Bus>>,
    emulator_base: Option<Arc<ProxyClass>>,
}

impl SearchRequest {
    /// Search by `params`
    #[must_use]
    pub fn new(params: SearchParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Search for connections of a process the caller launched.
    ///
    /// Its pid is used when `params` has none, and the search fails early
    /// once the process exits.
    #[must_use]
    pub fn process(mut self, process: Arc<dyn ProcessHandle>) -> Self {
        self.process = Some(process);
        self
    }

    /// Search this bus instead of the searcher's default
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Resolve proxy classes under this emulator base instead of a fresh
    /// `DefaultEmulatorBase`
    #[must_use]
    pub fn emulator_base(mut self, base: &Arc<ProxyClass>) -> Self {
        self.emulator_base = Some(Arc::clone(base));
        self
    }

    /// The search parameters
    #[must_use]
    pub const fn params(&self) -> &SearchParams {
        &self.params
    }
}

impl fmt::Debug for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchRequest")
            .field("params", &self.params)
            .field("process", &self.process.as_ref().map(|p| p.pid()))
            .field("bus", &self.bus.as_ref().map(|b| b.kind()))
            .field("emulator_base", &self.emulator_base.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

// =============================================================================
// SEARCH
// =============================================================================

/// Searches a bus for the application under test
#[derive(Debug, Clone)]
pub struct ProcessSearch {
    context: ProbeContext,
    bus: Arc<dyn Bus>,
    processes: Arc<dyn ProcessTable>,
    lookup: FilterLookup,
}

impl ProcessSearch {
    /// Search `bus` using the default filter table
    #[must_use]
    pub fn new(context: ProbeContext, bus: Arc<dyn Bus>, processes: Arc<dyn ProcessTable>) -> Self {
        Self {
            context,
            bus,
            processes,
            lookup: FilterLookup::default(),
        }
    }

    /// Replace the parameter → filter table
    #[must_use]
    pub fn with_lookup(mut self, lookup: FilterLookup) -> Self {
        self.lookup = lookup;
        self
    }

    /// Shared context
    #[must_use]
    pub const fn context(&self) -> &ProbeContext {
        &self.context
    }

    /// Find exactly one matching connection and return its root proxy.
    ///
    /// `object_path` defaults to the configured path. When a pid is known,
    /// a connection owned by that exact pid wins over ones owned by its
    /// children.
    ///
    /// # Errors
    ///
    /// - [`ProbeError::PidMismatch`] if the pid and process handle disagree
    /// - [`ProbeError::ProcessSearch`] if the pid is not running, the
    ///   process exits during the search, or nothing matched in time
    /// - [`ProbeError::MultipleResults`] if more than one connection matched
    /// - [`ProbeError::UnknownSearchParameter`] for parameters with no filter
    pub fn get_proxy_object(&self, request: SearchRequest) -> ProbeResult<ProxyObject> {
        let SearchRequest {
            mut params,
            process,
            bus,
            emulator_base,
        } = request;
        let bus = bus.unwrap_or_else(|| Arc::clone(&self.bus));

        if !params.contains("object_path") {
            params.set("object_path", self.context.config().object_path.clone());
        }
        let pid = self.check_process_and_pid(process.as_deref(), params.get_pid())?;
        if let Some(pid) = pid {
            params.set("pid", pid);
        }

        let chain = filter_chain(&params, &self.lookup)?;
        let mut connections =
            self.find_matching_connections(bus.as_ref(), &chain, &params, process.as_deref())?;
        if let Some(pid) = pid {
            connections = filter_parent_pids_from_children(bus.as_ref(), pid, connections);
        }

        let criteria = criteria_string(&params, process.as_ref().map(|p| p.pid()));
        let connection = raise_if_not_single_result(connections, &criteria)?;
        tracing::info!(connection = %connection, "found application connection");

        let object_path = params
            .get_text("object_path")
            .unwrap_or(&self.context.config().object_path)
            .to_string();
        let root = make_proxy_object(
            &self.context,
            bus.address(&connection, &object_path),
            emulator_base,
        )?;
        let owner = match pid {
            Some(pid) => pid,
            None => bus.connection_pid(&connection)?,
        };
        root.attach_application(owner, process);
        Ok(root)
    }

    /// Root proxy of the single running process called `name`
    ///
    /// # Errors
    ///
    /// See [`ProcessSearch::get_pid_for_process`] and
    /// [`ProcessSearch::get_proxy_object`]
    pub fn get_proxy_object_by_name(
        &self,
        name: &str,
        emulator_base: Option<&Arc<ProxyClass>>,
    ) -> ProbeResult<ProxyObject> {
        let pid = self.get_pid_for_process(name)?;
        let mut request = SearchRequest::new(SearchParams::new().pid(pid));
        if let Some(base) = emulator_base {
            request = request.emulator_base(base);
        }
        self.get_proxy_object(request)
    }

    /// Pid of the single running process called `name`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidArgument`] if no process or more than one
    /// has that name
    pub fn get_pid_for_process(&self, name: &str) -> ProbeResult<u32> {
        match self.processes.pids_for_name(name).as_slice() {
            [] => Err(ProbeError::invalid_argument(format!(
                "Process '{name}' not running"
            ))),
            [pid] => Ok(*pid),
            _ => Err(ProbeError::invalid_argument(format!(
                "More than one PID exists for process '{name}'"
            ))),
        }
    }

    /// Reconcile an explicit pid with a process handle.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PidMismatch`] when both are given and differ,
    /// [`ProbeError::ProcessSearch`] when the resulting pid is not running
    pub fn check_process_and_pid(
        &self,
        process: Option<&dyn ProcessHandle>,
        pid: Option<u32>,
    ) -> ProbeResult<Option<u32>> {
        let pid = match (process, pid) {
            (Some(process), None) => Some(process.pid()),
            (Some(process), Some(pid)) if process.pid() != pid => {
                return Err(ProbeError::PidMismatch {
                    pid,
                    process_pid: process.pid(),
                });
            }
            (_, pid) => pid,
        };
        if let Some(pid) = pid {
            if !self.processes.pid_exists(pid) {
                return Err(ProbeError::ProcessSearch {
                    message: format!("PID {pid} could not be found"),
                });
            }
        }
        Ok(pid)
    }

    /// Scan the bus until some connections pass `chain`, once a second for
    /// up to the default timeout.
    ///
    /// Returns the first non-empty scan, keeping one connection per owning
    /// pid, or an empty list if the timeout ran out.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::ProcessSearch`] if `process` exits, and
    /// transport errors from listing names
    pub fn find_matching_connections(
        &self,
        bus: &dyn Bus,
        chain: &[&dyn ConnectionFilter],
        params: &SearchParams,
        process: Option<&dyn ProcessHandle>,
    ) -> ProbeResult<Vec<String>> {
        let env = SearchEnv::new(bus, self.processes.as_ref());
        for elapsed in Timeout::default_period(&self.context) {
            env.reset_cache();
            raise_if_process_has_exited(process)?;

            let mut valid = Vec::new();
            for name in bus.list_names()? {
                if filter_runner(chain, &env, &name, params)? {
                    valid.push(name);
                }
            }
            if !valid.is_empty() {
                tracing::debug!(elapsed, matches = valid.len(), "connection scan matched");
                return Ok(dedupe_connections_on_pid(bus, valid));
            }
            tracing::trace!(elapsed, "no matching connections yet");
        }
        Ok(Vec::new())
    }
}

fn raise_if_process_has_exited(process: Option<&dyn ProcessHandle>) -> ProbeResult<()> {
    match process.and_then(|process| process.poll()) {
        Some(code) => Err(ProbeError::ProcessSearch {
            message: format!("Process exited with exit code: {code}"),
        }),
        None => Ok(()),
    }
}

/// Keep the first connection of each owning pid
fn dedupe_connections_on_pid(bus: &dyn Bus, connections: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    connections
        .into_iter()
        .filter(|connection| seen.insert(bus.connection_pid(connection).ok()))
        .collect()
}

/// Prefer the connection owned by `pid` itself over those of its children
#[must_use]
pub fn filter_parent_pids_from_children(
    bus: &dyn Bus,
    pid: u32,
    connections: Vec<String>,
) -> Vec<String> {
    match connections
        .iter()
        .find(|connection| bus.connection_pid(connection).ok() == Some(pid))
    {
        Some(parent) => {
            tracing::info!("Found the parent pid, ignoring any others.");
            vec![parent.clone()]
        }
        None => connections,
    }
}

/// The single connection in `connections`
///
/// # Errors
///
/// Returns [`ProbeError::ProcessSearch`] for none and
/// [`ProbeError::MultipleResults`] for more than one
pub fn raise_if_not_single_result(connections: Vec<String>, criteria: &str) -> ProbeResult<String> {
    let mut connections = connections.into_iter();
    match (connections.next(), connections.next()) {
        (None, _) => Err(ProbeError::ProcessSearch {
            message: format!("Search criteria ({criteria}) returned no results"),
        }),
        (Some(connection), None) => Ok(connection),
        (Some(_), Some(_)) => Err(ProbeError::MultipleResults {
            criteria: criteria.to_string(),
        }),
    }
}

// =============================================================================
// ROOT PROXY
// =============================================================================

/// Extension classes for the interfaces listed in introspection `xml`.
///
/// Returns `None` when the introspection interface itself is missing.
#[must_use]
pub fn proxy_bases_from_introspection_xml(
    context: &ProbeContext,
    xml: &str,
) -> Option<Vec<Arc<ProxyClass>>> {
    let config = context.config();
    let exports = |interface: &str| xml.contains(&format!("name=\"{interface}\""));
    if !exports(&config.introspection_interface) {
        return None;
    }
    let registry: &Registry = context.registry();
    let mut extensions = Vec::new();
    if exports(&config.qt_interface) {
        extensions.push(Arc::clone(registry.qt_object_proxy()));
    }
    Some(extensions)
}

/// Build the application root proxy for `address`.
///
/// Classes resolve under `emulator_base`, or a fresh `DefaultEmulatorBase`
/// when `None`. Toolkit extensions advertised by the peer are mixed into
/// every class of that base, and the root gains the application capability.
///
/// # Errors
///
/// - [`ProbeError::WrongBaseClass`] if `emulator_base` is derived from
///   another emulator base
/// - [`ProbeError::InterfaceNotFound`] if the peer does not export the
///   introspection interface
/// - [`ProbeError::StateNotFound`] if the peer reports no root object
pub fn make_proxy_object(
    context: &ProbeContext,
    address: Arc<dyn IpcAddress>,
    emulator_base: Option<Arc<ProxyClass>>,
) -> ProbeResult<ProxyObject> {
    let registry = context.registry();
    let base = match emulator_base {
        Some(base) => base,
        None => registry.make_default_emulator_base(),
    };
    registry.check_emulator_base(&base)?;

    let xml = address.introspect()?;
    let extensions = proxy_bases_from_introspection_xml(context, &xml).ok_or_else(|| {
        ProbeError::InterfaceNotFound {
            address: address.key().to_string(),
        }
    })?;
    registry.register_extension_classes_for_proxy_base(&base, extensions)?;
    let identity = base.identity().ok_or_else(|| {
        ProbeError::invalid_argument(format!("{} is not an emulator base", base.name()))
    })?;

    let backend = Backend::new(address, context.clone());
    let row = backend
        .execute_query_get_data(&Query::pseudo_tree_root())?
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::not_found(None, &Filters::new()))?;
    let class = registry.get_proxy_object_class(identity, &row.path, &row.state)?;
    class.push_base(registry.application_proxy());
    ProxyObject::new(row.state, row.path, class, identity, backend)
}
