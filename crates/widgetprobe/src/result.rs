//! Result and error types for widgetprobe.

use thiserror::Error;

use crate::query::Filters;

/// Result type for widgetprobe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// D-Bus error name for a peer that left the bus
pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// D-Bus error name for a well-known name nobody owns
pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";

/// Error raised by an IPC transport.
///
/// `name` is the transport's error identifier (a D-Bus error name for the
/// D-Bus transport); `message` is the human readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct TransportError {
    /// Transport error identifier
    pub name: String,
    /// Error message
    pub message: String,
}

impl TransportError {
    /// Create a new transport error
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The peer we were talking to is no longer on the bus
    #[must_use]
    pub fn service_unknown(message: impl Into<String>) -> Self {
        Self::new(SERVICE_UNKNOWN, message)
    }

    /// Whether this error means the peer vanished
    #[must_use]
    pub fn is_service_unknown(&self) -> bool {
        self.name == SERVICE_UNKNOWN
    }
}

/// Errors that can occur in widgetprobe
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Malformed query construction
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// Error message
        message: String,
    },

    /// An argument or a piece of remote state had an unusable value
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// A query expected to match at least one object matched none
    #[error("{}", not_found_message(.class_name.as_deref(), .filters))]
    StateNotFound {
        /// Type name that was searched for
        class_name: Option<String>,
        /// Filters that were applied
        filters: Filters,
    },

    /// More than one object matched where exactly one was required
    #[error("More than one item was returned for query {query} ({count} items)")]
    MultipleMatches {
        /// Rendered query
        query: String,
        /// Number of matches
        count: usize,
    },

    /// More than one custom proxy class validated against the same object
    #[error(
        "More than one custom proxy class matches this object: matching classes are: {}. Path is {path}.",
        .candidates.join(",")
    )]
    AmbiguousProxyClass {
        /// Names of every class that validated
        candidates: Vec<String>,
        /// Object path
        path: String,
    },

    /// Attribute lookup on a proxy object failed
    #[error("Class '{class_name}' has no attribute '{name}'.")]
    AttributeNotFound {
        /// Proxy class name
        class_name: String,
        /// Attribute name
        name: String,
    },

    /// A polling loop ran out of time
    #[error("{message}")]
    WaitTimeout {
        /// Error message
        message: String,
        /// Seconds spent waiting
        seconds: f64,
        /// Failure observed on the last poll, if any
        #[source]
        cause: Option<Box<ProbeError>>,
    },

    /// The application under test left the bus
    #[error(
        "Lost backend communication. It appears the application under test exited before the test finished!"
    )]
    ApplicationExited,

    /// Transport level failure, propagated unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote introspection protocol speaks another version
    #[error("Wire protocol mismatch at {address}: is {found}, expecting {expected}")]
    WireProtocolMismatch {
        /// Address description
        address: String,
        /// Version reported by the peer
        found: String,
        /// Version we speak
        expected: String,
    },

    /// The peer does not export the introspection interface
    #[error("Could not find the introspection interface on address '{address}'.")]
    InterfaceNotFound {
        /// Address description
        address: String,
    },

    /// Connection or process search failed
    #[error("{message}")]
    ProcessSearch {
        /// Error message
        message: String,
    },

    /// Connection search matched more than one peer
    #[error("Search criteria ({criteria}) returned multiple results")]
    MultipleResults {
        /// Rendered search criteria
        criteria: String,
    },

    /// Both a process handle and a pid were supplied and they disagree
    #[error("Supplied PID ({pid}) and process PID ({process_pid}) do not match.")]
    PidMismatch {
        /// Explicit pid
        pid: u32,
        /// Pid of the process handle
        process_pid: u32,
    },

    /// Search parameter without a filter
    #[error("Search parameter '{name}' doesn't have a corresponding filter in {known:?}")]
    UnknownSearchParameter {
        /// Offending parameter name
        name: String,
        /// Parameter names the lookup table knows about
        known: Vec<String>,
    },

    /// A filter chain was run with no filters at all
    #[error("Filter list must not be empty")]
    EmptyFilterChain,

    /// An emulator base that is itself derived from another emulator base
    #[error(
        "base class {passed} does not appear to be the actual base proxy class. Perhaps you meant to use: {actual}."
    )]
    WrongBaseClass {
        /// Class that was passed
        passed: String,
        /// Topmost class of the same lineage
        actual: String,
    },

    /// Qt signal name not exported by the object
    #[error("Signal name {signal:?} is not in the valid signal list of {valid:?}")]
    UnknownSignal {
        /// Requested signal
        signal: String,
        /// Signals the object exports
        valid: Vec<String>,
    },

    /// Capability mixin missing from the proxy class
    #[error("{class_name} does not provide the {capability} capability")]
    CapabilityUnavailable {
        /// Proxy class name
        class_name: String,
        /// Capability name
        capability: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ProbeError {
    /// Build a not-found error for a type name and filter set
    #[must_use]
    pub fn not_found(class_name: Option<&str>, filters: &Filters) -> Self {
        Self::StateNotFound {
            class_name: class_name.map(str::to_string),
            filters: filters.clone(),
        }
    }

    /// Build a validation error for a query
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Build an invalid-argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether nothing matched, either directly or after waiting
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::StateNotFound { .. } => true,
            Self::WaitTimeout {
                cause: Some(cause), ..
            } => cause.is_not_found(),
            _ => false,
        }
    }

    /// Whether a polling loop gave up
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}

fn not_found_message(class_name: Option<&str>, filters: &Filters) -> String {
    match (class_name, filters.is_empty()) {
        (Some(name), true) => format!("Object not found with name '{name}'."),
        (Some(name), false) => {
            format!("Object not found with name '{name}' and properties {filters}.")
        }
        (None, _) => format!("Object not found with properties {filters}."),
    }
}
