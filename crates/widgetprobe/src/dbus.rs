//! D-Bus transport (feature `dbus`).
//!
//! [`DbusBus`] wraps a blocking `zbus` connection to the session bus, the
//! system bus, or a bus at a custom address. [`DbusAddress`] speaks the
//! introspection and Qt interfaces of one exported object.

use crate::backend::{AddressKey, IpcAddress, QtInterface, Row};
use crate::config::{INTROSPECTION_INTERFACE, QT_INTERFACE};
use crate::result::{ProbeError, ProbeResult, TransportError};
use crate::search::{Bus, DAEMON_NAME};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use zbus::blocking::{Connection, ConnectionBuilder};
use zbus::zvariant::{OwnedValue, Value};
use zbus::DBusError;

const DAEMON_PATH: &str = "/org/freedesktop/DBus";
const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

fn transport_error(err: zbus::Error) -> TransportError {
    match err {
        zbus::Error::MethodError(name, message, _) => {
            TransportError::new(name.as_str(), message.unwrap_or_default())
        }
        zbus::Error::FDO(err) => {
            TransportError::new(err.name().as_str(), err.description().unwrap_or_default())
        }
        other => TransportError::new(FAILED, other.to_string()),
    }
}

fn connect(kind: &str, result: zbus::Result<Connection>) -> ProbeResult<DbusBus> {
    let connection = result.map_err(|err| ProbeError::Transport(transport_error(err)))?;
    tracing::debug!(bus = kind, "connected to message bus");
    Ok(DbusBus {
        connection,
        kind: kind.to_string(),
    })
}

// =============================================================================
// BUS
// =============================================================================

/// A D-Bus message bus
#[derive(Clone)]
pub struct DbusBus {
    connection: Connection,
    kind: String,
}

impl DbusBus {
    /// Connect to the session bus
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Transport`] if the bus is unreachable
    pub fn session() -> ProbeResult<Self> {
        connect("session", Connection::session())
    }

    /// Connect to the system bus
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Transport`] if the bus is unreachable
    pub fn system() -> ProbeResult<Self> {
        connect("system", Connection::system())
    }

    /// Connect to the bus at `address`, e.g. `unix:path=/tmp/test-bus`
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Transport`] for a malformed or unreachable
    /// address
    pub fn custom(address: &str) -> ProbeResult<Self> {
        let result = ConnectionBuilder::address(address).and_then(ConnectionBuilder::build);
        connect(address, result)
    }

    /// Address of one exported object on this bus
    #[must_use]
    pub fn dbus_address(&self, connection: &str, object_path: &str) -> DbusAddress {
        DbusAddress {
            connection: self.connection.clone(),
            key: AddressKey::new(self.kind.clone(), connection, object_path),
        }
    }

    fn call_daemon<B, R>(&self, method: &str, body: &B) -> Result<R, TransportError>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
        R: for<'d> zbus::zvariant::DynamicDeserialize<'d>,
    {
        let reply = self
            .connection
            .call_method(Some(DAEMON_NAME), DAEMON_PATH, Some(DAEMON_NAME), method, body)
            .map_err(transport_error)?;
        reply.body().deserialize().map_err(transport_error)
    }
}

impl fmt::Debug for DbusBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbusBus")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Bus for DbusBus {
    fn kind(&self) -> String {
        self.kind.clone()
    }

    fn list_names(&self) -> Result<Vec<String>, TransportError> {
        self.call_daemon("ListNames", &())
    }

    fn connection_pid(&self, connection: &str) -> Result<u32, TransportError> {
        self.call_daemon("GetConnectionUnixProcessID", &(connection,))
    }

    fn address(&self, connection: &str, object_path: &str) -> Arc<dyn IpcAddress> {
        Arc::new(self.dbus_address(connection, object_path))
    }
}

// =============================================================================
// ADDRESS
// =============================================================================

/// One object exporting the introspection interface
#[derive(Clone)]
pub struct DbusAddress {
    connection: Connection,
    key: AddressKey,
}

impl DbusAddress {
    fn call<B, R>(&self, interface: &str, method: &str, body: &B) -> Result<R, TransportError>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
        R: for<'d> zbus::zvariant::DynamicDeserialize<'d>,
    {
        let reply = self
            .connection
            .call_method(
                Some(self.key.connection.as_str()),
                self.key.object_path.as_str(),
                Some(interface),
                method,
                body,
            )
            .map_err(transport_error)?;
        reply.body().deserialize().map_err(transport_error)
    }
}

impl fmt::Debug for DbusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbusAddress")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl IpcAddress for DbusAddress {
    fn get_state(&self, query: &[u8]) -> Result<Vec<Row>, TransportError> {
        let query = String::from_utf8_lossy(query).into_owned();
        let reply: Vec<(String, OwnedValue)> =
            self.call(INTROSPECTION_INTERFACE, "GetState", &(query,))?;
        reply
            .into_iter()
            .map(|(path, state)| {
                let state: HashMap<String, OwnedValue> = HashMap::try_from(state)
                    .map_err(|err| TransportError::new(INVALID_ARGS, err.to_string()))?;
                let state: serde_json::Map<String, Json> = state
                    .iter()
                    .map(|(name, value)| (name.clone(), to_json(value)))
                    .collect();
                Ok(Row::new(path, Json::Object(state)))
            })
            .collect()
    }

    fn key(&self) -> AddressKey {
        self.key.clone()
    }

    fn introspect(&self) -> Result<String, TransportError> {
        self.call(INTROSPECTABLE, "Introspect", &())
    }

    fn get_version(&self) -> Result<String, TransportError> {
        self.call(INTROSPECTION_INTERFACE, "GetVersion", &())
    }

    fn qt(&self) -> Option<&dyn QtInterface> {
        Some(self)
    }
}

impl QtInterface for DbusAddress {
    fn list_signals(&self, object_id: i64) -> Result<Vec<String>, TransportError> {
        self.call(QT_INTERFACE, "ListSignals", &(wire_id(object_id)?,))
    }

    fn list_methods(&self, object_id: i64) -> Result<Vec<String>, TransportError> {
        self.call(QT_INTERFACE, "ListMethods", &(wire_id(object_id)?,))
    }

    fn invoke_method(&self, object_id: i64, method: &str, args: &[Json]) -> Result<(), TransportError> {
        let args = args.iter().map(to_variant).collect::<Result<Vec<_>, _>>()?;
        self.call(QT_INTERFACE, "InvokeMethod", &(wire_id(object_id)?, method, args))
    }

    fn register_signal_interest(&self, object_id: i64, signal: &str) -> Result<(), TransportError> {
        self.call(QT_INTERFACE, "RegisterSignalInterest", &(wire_id(object_id)?, signal))
    }

    fn get_signal_emissions(&self, object_id: i64, signal: &str) -> Result<i64, TransportError> {
        let count: i32 = self.call(QT_INTERFACE, "GetSignalEmissions", &(wire_id(object_id)?, signal))?;
        Ok(count.into())
    }
}

/// Object ids travel as 32-bit integers on the Qt interface
fn wire_id(object_id: i64) -> Result<i32, TransportError> {
    i32::try_from(object_id)
        .map_err(|_| TransportError::new(INVALID_ARGS, format!("object id {object_id} out of range")))
}

// =============================================================================
// VALUE CONVERSION
// =============================================================================

fn to_json(value: &Value<'_>) -> Json {
    match value {
        Value::U8(v) => Json::from(*v),
        Value::Bool(v) => Json::from(*v),
        Value::I16(v) => Json::from(*v),
        Value::U16(v) => Json::from(*v),
        Value::I32(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::I64(v) => Json::from(*v),
        Value::U64(v) => Json::from(*v),
        Value::F64(v) => Json::from(*v),
        Value::Str(v) => Json::from(v.as_str()),
        Value::ObjectPath(v) => Json::from(v.as_str()),
        Value::Value(inner) => to_json(inner),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Structure(fields) => Json::Array(fields.fields().iter().map(to_json).collect()),
        _ => Json::Null,
    }
}

fn to_variant(value: &Json) -> Result<Value<'static>, TransportError> {
    Ok(match value {
        Json::Bool(v) => Value::from(*v),
        Json::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(int), _) => i32::try_from(int).map_or_else(|_| Value::from(int), Value::from),
            (None, Some(float)) => Value::from(float),
            (None, None) => {
                return Err(TransportError::new(INVALID_ARGS, format!("unsupported number {n}")));
            }
        },
        Json::String(v) => Value::from(v.clone()),
        Json::Array(items) => Value::from(items.iter().map(to_variant).collect::<Result<Vec<_>, _>>()?),
        Json::Null | Json::Object(_) => {
            return Err(TransportError::new(
                INVALID_ARGS,
                format!("cannot send {value} as a D-Bus argument"),
            ));
        }
    })
}
