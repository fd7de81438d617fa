//! Message bus seam.

use crate::backend::IpcAddress;
use crate::result::TransportError;
use std::fmt;
use std::sync::Arc;

/// Well-known name of the bus daemon itself
pub const DAEMON_NAME: &str = "org.freedesktop.DBus";

/// A message bus carrying the applications under test
pub trait Bus: fmt::Debug + Send + Sync {
    /// Short description used in address keys (`session`, `system`, ...)
    fn kind(&self) -> String;

    /// Every connection name currently on the bus
    fn list_names(&self) -> Result<Vec<String>, TransportError>;

    /// Pid of the process owning `connection`
    fn connection_pid(&self, connection: &str) -> Result<u32, TransportError>;

    /// Introspection address for `object_path` on `connection`
    fn address(&self, connection: &str, object_path: &str) -> Arc<dyn IpcAddress>;
}
