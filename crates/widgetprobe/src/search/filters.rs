//! Connection filters.
//!
//! Each filter is a stateless matcher with a priority; higher priorities run
//! first so cheap, discriminating checks reject candidates before the ones
//! that talk to the peer. The two mandatory filters run on every search.

use super::bus::{Bus, DAEMON_NAME};
use super::params::SearchParams;
use super::process::ProcessTable;
use crate::config::DEFAULT_OBJECT_PATH;
use crate::query::get_classname_from_path;
use crate::result::{ProbeError, ProbeResult};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// What filters can look at while matching
pub struct SearchEnv<'a> {
    bus: &'a dyn Bus,
    processes: &'a dyn ProcessTable,
    child_pids: RefCell<HashMap<u32, Vec<u32>>>,
}

impl<'a> SearchEnv<'a> {
    /// Create an environment for one search
    #[must_use]
    pub fn new(bus: &'a dyn Bus, processes: &'a dyn ProcessTable) -> Self {
        Self {
            bus,
            processes,
            child_pids: RefCell::new(HashMap::new()),
        }
    }

    /// The bus being searched
    #[must_use]
    pub fn bus(&self) -> &dyn Bus {
        self.bus
    }

    /// The process table
    #[must_use]
    pub fn processes(&self) -> &dyn ProcessTable {
        self.processes
    }

    /// Descendant pids of `pid`, cached until [`SearchEnv::reset_cache`]
    #[must_use]
    pub fn child_pids(&self, pid: u32) -> Vec<u32> {
        self.child_pids
            .borrow_mut()
            .entry(pid)
            .or_insert_with(|| self.processes.child_pids(pid))
            .clone()
    }

    /// Forget cached process relationships before a new scan
    pub fn reset_cache(&self) {
        self.child_pids.borrow_mut().clear();
        self.processes.refresh();
    }
}

impl fmt::Debug for SearchEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchEnv")
            .field("bus", &self.bus.kind())
            .finish_non_exhaustive()
    }
}

/// Predicate over one connection name
pub trait ConnectionFilter: fmt::Debug + Send + Sync {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Higher runs first
    fn priority(&self) -> u8;

    /// Whether `connection` passes
    fn matches(&self, env: &SearchEnv<'_>, connection: &str, params: &SearchParams) -> bool;
}

/// Rejects the bus daemon's own name
#[derive(Debug, Clone, Copy, Default)]
pub struct NotDaemonName;

impl ConnectionFilter for NotDaemonName {
    fn name(&self) -> &'static str {
        "NotDaemonName"
    }

    fn priority(&self) -> u8 {
        13
    }

    fn matches(&self, _env: &SearchEnv<'_>, connection: &str, _params: &SearchParams) -> bool {
        connection != DAEMON_NAME
    }
}

/// Rejects connections owned by the searching process, or with unknown owner
#[derive(Debug, Clone, Copy, Default)]
pub struct NotOwnConnection;

impl ConnectionFilter for NotOwnConnection {
    fn name(&self) -> &'static str {
        "NotOwnConnection"
    }

    fn priority(&self) -> u8 {
        12
    }

    fn matches(&self, env: &SearchEnv<'_>, connection: &str, _params: &SearchParams) -> bool {
        env.bus()
            .connection_pid(connection)
            .is_ok_and(|pid| pid != env.processes().current_pid())
    }
}

/// Matches the `connection_name` parameter exactly
#[derive(Debug, Clone, Copy, Default)]
pub struct HasConnectionName;

impl ConnectionFilter for HasConnectionName {
    fn name(&self) -> &'static str {
        "HasConnectionName"
    }

    fn priority(&self) -> u8 {
        11
    }

    fn matches(&self, _env: &SearchEnv<'_>, connection: &str, params: &SearchParams) -> bool {
        params.get_text("connection_name") == Some(connection)
    }
}

/// Matches connections owned by `pid` or any of its descendants
#[derive(Debug, Clone, Copy, Default)]
pub struct HasPid;

impl ConnectionFilter for HasPid {
    fn name(&self) -> &'static str {
        "HasPid"
    }

    fn priority(&self) -> u8 {
        9
    }

    fn matches(&self, env: &SearchEnv<'_>, connection: &str, params: &SearchParams) -> bool {
        let Some(pid) = params.get_pid() else {
            return false;
        };
        match env.bus().connection_pid(connection) {
            Ok(owner) => owner == pid || env.child_pids(pid).contains(&owner),
            Err(_) => false,
        }
    }
}

/// Matches connections exporting the introspection interface at `object_path`
#[derive(Debug, Clone, Copy, Default)]
pub struct HasIntrospectionPath;

impl ConnectionFilter for HasIntrospectionPath {
    fn name(&self) -> &'static str {
        "HasIntrospectionPath"
    }

    fn priority(&self) -> u8 {
        8
    }

    fn matches(&self, env: &SearchEnv<'_>, connection: &str, params: &SearchParams) -> bool {
        let path = params.get_text("object_path").unwrap_or(DEFAULT_OBJECT_PATH);
        env.bus().address(connection, path).get_version().is_ok()
    }
}

/// Matches on the type name of the application root
#[derive(Debug, Clone, Copy, Default)]
pub struct HasApplicationName;

impl ConnectionFilter for HasApplicationName {
    fn name(&self) -> &'static str {
        "HasApplicationName"
    }

    fn priority(&self) -> u8 {
        0
    }

    fn matches(&self, env: &SearchEnv<'_>, connection: &str, params: &SearchParams) -> bool {
        let Some(wanted) = params.get_text("application_name") else {
            return false;
        };
        let path = params.get_text("object_path").unwrap_or(DEFAULT_OBJECT_PATH);
        match env.bus().address(connection, path).get_state(b"/") {
            Ok(rows) => rows
                .first()
                .is_some_and(|row| get_classname_from_path(&row.path) == wanted),
            Err(_) => false,
        }
    }
}

static NOT_DAEMON_NAME: NotDaemonName = NotDaemonName;
static NOT_OWN_CONNECTION: NotOwnConnection = NotOwnConnection;
static HAS_CONNECTION_NAME: HasConnectionName = HasConnectionName;
static HAS_PID: HasPid = HasPid;
static HAS_INTROSPECTION_PATH: HasIntrospectionPath = HasIntrospectionPath;
static HAS_APPLICATION_NAME: HasApplicationName = HasApplicationName;

/// Filters applied to every search
#[must_use]
pub fn mandatory_filters() -> Vec<&'static dyn ConnectionFilter> {
    vec![&NOT_OWN_CONNECTION, &NOT_DAEMON_NAME]
}

/// Parameter name → filter table
#[derive(Debug, Clone)]
pub struct FilterLookup {
    filters: BTreeMap<String, &'static dyn ConnectionFilter>,
}

impl FilterLookup {
    /// Empty table
    #[must_use]
    pub fn empty() -> Self {
        Self {
            filters: BTreeMap::new(),
        }
    }

    /// Add or replace an entry
    #[must_use]
    pub fn with(mut self, name: &str, filter: &'static dyn ConnectionFilter) -> Self {
        self.filters.insert(name.to_string(), filter);
        self
    }

    /// Parameter names the table knows
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.filters.keys().cloned().collect()
    }

    /// Filters for each parameter in `params`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::UnknownSearchParameter`] for a parameter with no entry
    pub fn filters_for(&self, params: &SearchParams) -> ProbeResult<Vec<&'static dyn ConnectionFilter>> {
        params
            .iter()
            .map(|(name, _)| {
                self.filters
                    .get(name)
                    .copied()
                    .ok_or_else(|| ProbeError::UnknownSearchParameter {
                        name: name.to_string(),
                        known: self.names(),
                    })
            })
            .collect()
    }
}

impl Default for FilterLookup {
    fn default() -> Self {
        Self::empty()
            .with("connection_name", &HAS_CONNECTION_NAME)
            .with("application_name", &HAS_APPLICATION_NAME)
            .with("object_path", &HAS_INTROSPECTION_PATH)
            .with("pid", &HAS_PID)
    }
}

/// Mandatory filters plus one per parameter, highest priority first
///
/// # Errors
///
/// Returns [`ProbeError::UnknownSearchParameter`] for unknown parameters
pub fn filter_chain(
    params: &SearchParams,
    lookup: &FilterLookup,
) -> ProbeResult<Vec<&'static dyn ConnectionFilter>> {
    let mut filters = mandatory_filters();
    filters.extend(lookup.filters_for(params)?);
    filters.sort_by_key(|filter| std::cmp::Reverse(filter.priority()));
    Ok(filters)
}

/// Run `filters` in order, stopping at the first rejection
///
/// # Errors
///
/// Returns [`ProbeError::EmptyFilterChain`] if `filters` is empty
pub fn filter_runner(
    filters: &[&dyn ConnectionFilter],
    env: &SearchEnv<'_>,
    connection: &str,
    params: &SearchParams,
) -> ProbeResult<bool> {
    if filters.is_empty() {
        return Err(ProbeError::EmptyFilterChain);
    }
    for filter in filters {
        if !filter.matches(env, connection, params) {
            tracing::trace!(connection, filter = filter.name(), "connection rejected");
            return Ok(false);
        }
    }
    Ok(true)
}
