//! In-memory test doubles.
//!
//! [`FakeAddress`] answers wire queries from a scripted list, a closure, or
//! an in-memory object tree that evaluates the query itself. [`FakeBus`],
//! [`FakeProcessTable`] and [`FakeProcess`] stand in for the message bus and
//! the operating system during connection search.
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use widgetprobe::backend::Row;
//! use widgetprobe::fake::FakeAddress;
//! use widgetprobe::{search, ProbeContext};
//!
//! let address = FakeAddress::tree(vec![
//!     Row::new("/App", json!({"id": [0, 1]})),
//!     Row::new("/App/Button", json!({"id": [0, 2], "label": [0, "OK"]})),
//! ]);
//! let context = ProbeContext::new_mocked();
//! let root = search::make_proxy_object(&context, Arc::new(address), None).unwrap();
//! let button = root.select_single("Button", widgetprobe::filters!{}).unwrap();
//! assert_eq!(button.get("label").unwrap().as_str(), Some("OK"));
//! ```

// Allow expect for Mutex - lock poisoning is truly exceptional
#![allow(clippy::expect_used)]

use crate::backend::{AddressKey, IpcAddress, QtInterface, Row};
use crate::config::{DEFAULT_OBJECT_PATH, INTROSPECTION_INTERFACE, QT_INTERFACE, WIRE_PROTOCOL_VERSION};
use crate::result::TransportError;
use crate::search::{Bus, ProcessHandle, ProcessTable};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// D-Bus error name used for missing objects
pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

type Responder = Box<dyn Fn(&[u8]) -> Result<Vec<Row>, TransportError> + Send + Sync>;

enum Source {
    Fixed(Vec<Row>),
    Tree(Vec<Row>),
    Scripted(VecDeque<Vec<Row>>),
    Function(Responder),
    Failing(TransportError),
}

// =============================================================================
// FAKE ADDRESS
// =============================================================================

/// Scripted [`IpcAddress`]
pub struct FakeAddress {
    key: AddressKey,
    source: Mutex<Source>,
    queries: Mutex<Vec<Vec<u8>>>,
    version: Option<String>,
    version_calls: AtomicUsize,
    exports_interface: bool,
    qt: Option<FakeQt>,
}

impl FakeAddress {
    fn from_source(source: Source) -> Self {
        Self {
            key: AddressKey::new("fake", ":1.0", DEFAULT_OBJECT_PATH),
            source: Mutex::new(source),
            queries: Mutex::new(Vec::new()),
            version: Some(WIRE_PROTOCOL_VERSION.to_string()),
            version_calls: AtomicUsize::new(0),
            exports_interface: true,
            qt: None,
        }
    }

    /// Answer every query with `rows`
    #[must_use]
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self::from_source(Source::Fixed(rows))
    }

    /// Evaluate queries against an object tree given as rows
    #[must_use]
    pub fn tree(rows: Vec<Row>) -> Self {
        Self::from_source(Source::Tree(rows))
    }

    /// Answer successive queries with successive responses; the last one repeats
    #[must_use]
    pub fn scripted(responses: Vec<Vec<Row>>) -> Self {
        Self::from_source(Source::Scripted(responses.into()))
    }

    /// Answer queries with a closure
    #[must_use]
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<Row>, TransportError> + Send + Sync + 'static,
    {
        Self::from_source(Source::Function(Box::new(respond)))
    }

    /// Fail every query with `error`
    #[must_use]
    pub fn failing(error: TransportError) -> Self {
        Self::from_source(Source::Failing(error))
    }

    /// An address nothing is exported at
    #[must_use]
    pub fn missing() -> Self {
        let mut address = Self::failing(TransportError::new(UNKNOWN_OBJECT, "No such object path"));
        address.version = None;
        address.exports_interface = false;
        address
    }

    /// Report `version` from `get_version`, or fail it when `None`
    #[must_use]
    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    /// Use a specific address key
    #[must_use]
    pub fn with_key(mut self, key: AddressKey) -> Self {
        self.key = key;
        self
    }

    /// Export the Qt extension interface
    #[must_use]
    pub fn with_qt(mut self, qt: FakeQt) -> Self {
        self.qt = Some(qt);
        self
    }

    /// Stop exporting the introspection interface
    #[must_use]
    pub fn without_interface(mut self) -> Self {
        self.exports_interface = false;
        self
    }

    /// Wire queries received so far
    #[must_use]
    pub fn queries(&self) -> Vec<Vec<u8>> {
        self.queries.lock().expect("lock poisoned").clone()
    }

    /// Number of `get_version` calls
    #[must_use]
    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    /// Fake Qt interface, if any
    #[must_use]
    pub fn fake_qt(&self) -> Option<&FakeQt> {
        self.qt.as_ref()
    }

    /// Replace the tree or fixed rows
    pub fn set_rows(&self, rows: Vec<Row>) {
        let mut source = self.source.lock().expect("lock poisoned");
        match &mut *source {
            Source::Tree(current) | Source::Fixed(current) => *current = rows,
            other => *other = Source::Tree(rows),
        }
    }

    /// Remove the object at `path` and everything below it
    pub fn remove_subtree(&self, path: &str) {
        let prefix = format!("{path}/");
        self.with_tree_rows(|rows| {
            rows.retain(|row| {
                let row_path = String::from_utf8_lossy(&row.path);
                row_path != path && !row_path.starts_with(&prefix)
            });
        });
    }

    /// Set a raw attribute of the object at `path`
    pub fn set_attribute(&self, path: &str, name: &str, wire: Value) {
        self.with_tree_rows(|rows| {
            for row in rows.iter_mut().filter(|row| row.path == path.as_bytes()) {
                row.state.insert(name.to_string(), wire.clone());
            }
        });
    }

    fn with_tree_rows(&self, edit: impl FnOnce(&mut Vec<Row>)) {
        let mut source = self.source.lock().expect("lock poisoned");
        if let Source::Tree(rows) | Source::Fixed(rows) = &mut *source {
            edit(rows);
        }
    }
}

impl IpcAddress for FakeAddress {
    fn get_state(&self, query: &[u8]) -> Result<Vec<Row>, TransportError> {
        self.queries
            .lock()
            .expect("lock poisoned")
            .push(query.to_vec());
        let mut source = self.source.lock().expect("lock poisoned");
        match &mut *source {
            Source::Fixed(rows) => Ok(rows.clone()),
            Source::Tree(rows) => evaluate(rows, query),
            Source::Scripted(responses) => {
                if responses.len() > 1 {
                    Ok(responses.pop_front().unwrap_or_default())
                } else {
                    Ok(responses.front().cloned().unwrap_or_default())
                }
            }
            Source::Function(respond) => respond(query),
            Source::Failing(error) => Err(error.clone()),
        }
    }

    fn key(&self) -> AddressKey {
        self.key.clone()
    }

    fn introspect(&self) -> Result<String, TransportError> {
        if !self.exports_interface && self.version.is_none() {
            return Err(TransportError::new(UNKNOWN_OBJECT, "No such object path"));
        }
        let mut xml = String::from("<node>\n");
        xml.push_str("  <interface name=\"org.freedesktop.DBus.Introspectable\"/>\n");
        if self.exports_interface {
            xml.push_str(&format!("  <interface name=\"{INTROSPECTION_INTERFACE}\"/>\n"));
        }
        if self.qt.is_some() {
            xml.push_str(&format!("  <interface name=\"{QT_INTERFACE}\"/>\n"));
        }
        xml.push_str("</node>\n");
        Ok(xml)
    }

    fn get_version(&self) -> Result<String, TransportError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.version.clone().ok_or_else(|| {
            TransportError::new("org.freedesktop.DBus.Error.UnknownMethod", "No GetVersion method")
        })
    }

    fn qt(&self) -> Option<&dyn QtInterface> {
        self.qt.as_ref().map(|qt| qt as &dyn QtInterface)
    }
}

impl fmt::Debug for FakeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeAddress")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("qt", &self.qt.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// QUERY EVALUATION
// =============================================================================

#[derive(Debug, PartialEq)]
enum StepOp {
    Child,
    Descendant,
}

#[derive(Debug)]
struct Step {
    op: StepOp,
    name: String,
    filters: Vec<(String, Value)>,
}

fn bad_query(query: &[u8]) -> TransportError {
    TransportError::new(
        "org.freedesktop.DBus.Error.InvalidArgs",
        format!("Unable to parse query '{}'", String::from_utf8_lossy(query)),
    )
}

fn parse_steps(query: &[u8]) -> Result<Vec<Step>, TransportError> {
    let text = std::str::from_utf8(query).map_err(|_| bad_query(query))?;
    let chars: Vec<char> = text.chars().collect();
    let mut steps = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '/' {
            return Err(bad_query(query));
        }
        let op = if chars.get(i + 1) == Some(&'/') {
            i += 2;
            StepOp::Descendant
        } else {
            i += 1;
            StepOp::Child
        };
        let start = i;
        while i < chars.len() && chars[i] != '/' && chars[i] != '[' {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();
        let mut filters = Vec::new();
        if chars.get(i) == Some(&'[') {
            i += 1;
            loop {
                let key_start = i;
                while i < chars.len() && chars[i] != '=' {
                    i += 1;
                }
                let key: String = chars[key_start..i].iter().collect();
                i += 1;
                let (value, next) = parse_value(&chars, i).ok_or_else(|| bad_query(query))?;
                filters.push((key, value));
                i = next;
                match chars.get(i) {
                    Some(',') => i += 1,
                    Some(']') => {
                        i += 1;
                        break;
                    }
                    _ => return Err(bad_query(query)),
                }
            }
        }
        steps.push(Step { op, name, filters });
    }
    Ok(steps)
}

fn parse_value(chars: &[char], mut i: usize) -> Option<(Value, usize)> {
    if chars.get(i) == Some(&'"') {
        i += 1;
        let mut out = String::new();
        while let Some(&c) = chars.get(i) {
            match c {
                '"' => return Some((Value::String(out), i + 1)),
                '\\' => {
                    let escaped = *chars.get(i + 1)?;
                    i += 2;
                    match escaped {
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'x' => {
                            let hex: String = chars.get(i..i + 2)?.iter().collect();
                            out.push(char::from(u8::from_str_radix(&hex, 16).ok()?));
                            i += 2;
                        }
                        other => out.push(other),
                    }
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        return None;
    }
    let start = i;
    while i < chars.len() && chars[i] != ',' && chars[i] != ']' {
        i += 1;
    }
    let literal: String = chars[start..i].iter().collect();
    let value = match literal.as_str() {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        number => Value::from(number.parse::<i64>().ok()?),
    };
    Some((value, i))
}

fn parent_path(path: &str) -> Option<&str> {
    let index = path.rfind('/')?;
    (index > 0).then(|| &path[..index])
}

fn matches_step(row: &Row, step: &Step) -> bool {
    let path = String::from_utf8_lossy(&row.path);
    let name = path.rsplit('/').next().unwrap_or_default();
    if step.name != "*" && step.name != name {
        return false;
    }
    step.filters.iter().all(|(key, expected)| {
        row.state
            .get(key)
            .and_then(Value::as_array)
            .and_then(|wire| wire.get(1))
            .is_some_and(|actual| actual == expected)
    })
}

fn evaluate(rows: &[Row], query: &[u8]) -> Result<Vec<Row>, TransportError> {
    let steps = parse_steps(query)?;
    let paths: Vec<String> = rows
        .iter()
        .map(|row| String::from_utf8_lossy(&row.path).into_owned())
        .collect();
    // `None` stands for the virtual node above the application root.
    let mut current: Vec<Option<usize>> = vec![None];
    for step in &steps {
        let mut next: Vec<Option<usize>> = Vec::new();
        let mut push = |index: usize| {
            if !next.contains(&Some(index)) {
                next.push(Some(index));
            }
        };
        if step.name == ".." {
            for &node in &current {
                let Some(node) = node else { continue };
                if let Some(parent) = parent_path(&paths[node]) {
                    if let Some(index) = paths.iter().position(|p| p == parent) {
                        push(index);
                    }
                } else {
                    push(node);
                }
            }
        } else {
            for (index, path) in paths.iter().enumerate() {
                let related = current.iter().any(|node| {
                    let base = node.map_or("", |n| paths[n].as_str());
                    match step.op {
                        StepOp::Child => parent_path(path).unwrap_or("") == base,
                        StepOp::Descendant => path.starts_with(&format!("{base}/")),
                    }
                });
                let pseudo_root = step.name.is_empty() && current == [None];
                if related && (pseudo_root || matches_step(&rows[index], step)) {
                    push(index);
                }
            }
        }
        current = next;
    }
    Ok(current
        .into_iter()
        .flatten()
        .map(|index| rows[index].clone())
        .collect())
}

// =============================================================================
// FAKE QT
// =============================================================================

/// Scripted [`QtInterface`]
#[derive(Debug, Default)]
pub struct FakeQt {
    signals: HashMap<i64, Vec<String>>,
    methods: HashMap<i64, Vec<String>>,
    interest: Mutex<BTreeSet<(i64, String)>>,
    emissions: Mutex<HashMap<(i64, String), i64>>,
    invocations: Mutex<Vec<(i64, String, Vec<Value>)>>,
}

impl FakeQt {
    /// No objects
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the signals of an object
    #[must_use]
    pub fn with_signals(mut self, object_id: i64, signals: &[&str]) -> Self {
        self.signals
            .insert(object_id, signals.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Declare the methods of an object
    #[must_use]
    pub fn with_methods(mut self, object_id: i64, methods: &[&str]) -> Self {
        self.methods
            .insert(object_id, methods.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// Emit a signal; counted only once interest was registered
    pub fn emit(&self, object_id: i64, signal: &str) {
        let key = (object_id, signal.to_string());
        if self.interest.lock().expect("lock poisoned").contains(&key) {
            *self
                .emissions
                .lock()
                .expect("lock poisoned")
                .entry(key)
                .or_default() += 1;
        }
    }

    /// Method invocations received so far
    #[must_use]
    pub fn invocations(&self) -> Vec<(i64, String, Vec<Value>)> {
        self.invocations.lock().expect("lock poisoned").clone()
    }
}

impl QtInterface for FakeQt {
    fn list_signals(&self, object_id: i64) -> Result<Vec<String>, TransportError> {
        Ok(self.signals.get(&object_id).cloned().unwrap_or_default())
    }

    fn list_methods(&self, object_id: i64) -> Result<Vec<String>, TransportError> {
        Ok(self.methods.get(&object_id).cloned().unwrap_or_default())
    }

    fn invoke_method(
        &self,
        object_id: i64,
        method: &str,
        args: &[Value],
    ) -> Result<(), TransportError> {
        self.invocations.lock().expect("lock poisoned").push((
            object_id,
            method.to_string(),
            args.to_vec(),
        ));
        Ok(())
    }

    fn register_signal_interest(
        &self,
        object_id: i64,
        signal: &str,
    ) -> Result<(), TransportError> {
        let key = (object_id, signal.to_string());
        self.interest.lock().expect("lock poisoned").insert(key.clone());
        self.emissions.lock().expect("lock poisoned").insert(key, 0);
        Ok(())
    }

    fn get_signal_emissions(&self, object_id: i64, signal: &str) -> Result<i64, TransportError> {
        Ok(self
            .emissions
            .lock()
            .expect("lock poisoned")
            .get(&(object_id, signal.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

// =============================================================================
// FAKE BUS & PROCESSES
// =============================================================================

#[derive(Debug)]
struct FakeConnection {
    name: String,
    pid: u32,
    addresses: HashMap<String, Arc<FakeAddress>>,
}

/// In-memory [`Bus`]
#[derive(Debug, Default)]
pub struct FakeBus {
    connections: Mutex<Vec<FakeConnection>>,
    list_calls: AtomicUsize,
}

impl FakeBus {
    /// A bus with only the daemon on it
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection owned by `pid`, exporting `address` at the default
    /// object path when given
    #[must_use]
    pub fn with_connection(self, name: &str, pid: u32, address: Option<Arc<FakeAddress>>) -> Self {
        self.add_connection(name, pid, address);
        self
    }

    /// Add a connection exporting `address` at `object_path`
    #[must_use]
    pub fn with_address_at(self, name: &str, pid: u32, object_path: &str, address: Arc<FakeAddress>) -> Self {
        self.add_connection(name, pid, None);
        self.connections
            .lock()
            .expect("lock poisoned")
            .iter_mut()
            .filter(|c| c.name == name)
            .for_each(|c| {
                c.addresses.insert(object_path.to_string(), Arc::clone(&address));
            });
        self
    }

    /// Add a connection while a search may be running
    pub fn add_connection(&self, name: &str, pid: u32, address: Option<Arc<FakeAddress>>) {
        let mut addresses = HashMap::new();
        if let Some(address) = address {
            addresses.insert(DEFAULT_OBJECT_PATH.to_string(), address);
        }
        self.connections
            .lock()
            .expect("lock poisoned")
            .push(FakeConnection {
                name: name.to_string(),
                pid,
                addresses,
            });
    }

    /// Number of `list_names` calls
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl Bus for FakeBus {
    fn kind(&self) -> String {
        "fake".to_string()
    }

    fn list_names(&self) -> Result<Vec<String>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut names = vec![crate::search::DAEMON_NAME.to_string()];
        names.extend(
            self.connections
                .lock()
                .expect("lock poisoned")
                .iter()
                .map(|c| c.name.clone()),
        );
        Ok(names)
    }

    fn connection_pid(&self, connection: &str) -> Result<u32, TransportError> {
        self.connections
            .lock()
            .expect("lock poisoned")
            .iter()
            .find(|c| c.name == connection)
            .map(|c| c.pid)
            .ok_or_else(|| {
                TransportError::new(
                    crate::result::NAME_HAS_NO_OWNER,
                    format!("Could not get PID of name '{connection}'"),
                )
            })
    }

    fn address(&self, connection: &str, object_path: &str) -> Arc<dyn IpcAddress> {
        self.connections
            .lock()
            .expect("lock poisoned")
            .iter()
            .find(|c| c.name == connection)
            .and_then(|c| c.addresses.get(object_path))
            .map_or_else(
                || Arc::new(FakeAddress::missing()) as Arc<dyn IpcAddress>,
                |address| Arc::clone(address) as Arc<dyn IpcAddress>,
            )
    }
}

/// In-memory [`ProcessTable`]
#[derive(Debug, Clone, Default)]
pub struct FakeProcessTable {
    current: u32,
    running: BTreeSet<u32>,
    children: HashMap<u32, Vec<u32>>,
    names: HashMap<String, Vec<u32>>,
}

impl FakeProcessTable {
    /// A table where the searching process has pid `current`
    #[must_use]
    pub fn new(current: u32) -> Self {
        Self {
            current,
            running: BTreeSet::from([current]),
            ..Self::default()
        }
    }

    /// Mark `pid` as running
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.running.insert(pid);
        self
    }

    /// Record `child` as a child of `parent`; both are running
    #[must_use]
    pub fn with_child(mut self, parent: u32, child: u32) -> Self {
        self.running.extend([parent, child]);
        self.children.entry(parent).or_default().push(child);
        self
    }

    /// Record a running process called `name`
    #[must_use]
    pub fn with_named(mut self, name: &str, pid: u32) -> Self {
        self.running.insert(pid);
        self.names.entry(name.to_string()).or_default().push(pid);
        self
    }
}

impl ProcessTable for FakeProcessTable {
    fn current_pid(&self) -> u32 {
        self.current
    }

    fn pid_exists(&self, pid: u32) -> bool {
        self.running.contains(&pid)
    }

    fn child_pids(&self, pid: u32) -> Vec<u32> {
        crate::search::process::descendants(pid, &self.children)
    }

    fn pids_for_name(&self, name: &str) -> Vec<u32> {
        self.names.get(name).cloned().unwrap_or_default()
    }
}

/// [`ProcessHandle`] whose exit is controlled by the test
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    exit_code: Mutex<Option<i32>>,
}

impl FakeProcess {
    /// A running process
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            exit_code: Mutex::new(None),
        }
    }

    /// Make the process exit with `code`
    pub fn exit(&self, code: i32) {
        *self.exit_code.lock().expect("lock poisoned") = Some(code);
    }
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll(&self) -> Option<i32> {
        *self.exit_code.lock().expect("lock poisoned")
    }
}
