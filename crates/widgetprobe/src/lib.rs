//! widgetprobe: introspection core for GUI functional tests
//!
//! An application under test exports its widget tree over an IPC bus. Tests
//! find the application with a connection search, then navigate the tree
//! through lazily refreshing proxy objects built from XPathSelect queries.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      WIDGETPROBE Architecture                      │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐           │
//! │  │ ProcessSearch│──►│ Backend      │──►│ IpcAddress   │──► bus    │
//! │  │ (filters)    │   │ (GetState)   │   │ (D-Bus/fake) │           │
//! │  └──────────────┘   └──────┬───────┘   └──────────────┘           │
//! │                            │                                      │
//! │  ┌──────────────┐   ┌──────▼───────┐   ┌──────────────┐           │
//! │  │ Query        │◄──│ ProxyObject  │──►│ Registry     │           │
//! │  │ (XPathSelect)│   │ (state cache)│   │ (classes)    │           │
//! │  └──────────────┘   └──────────────┘   └──────────────┘           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use widgetprobe::backend::Row;
//! use widgetprobe::fake::FakeAddress;
//! use widgetprobe::{filters, search, ProbeContext};
//!
//! let address = FakeAddress::tree(vec![
//!     Row::new("/Calculator", json!({"id": [0, 1]})),
//!     Row::new("/Calculator/Key", json!({"id": [0, 2], "text": [0, "7"]})),
//!     Row::new("/Calculator/Key", json!({"id": [0, 3], "text": [0, "8"]})),
//! ]);
//! let context = ProbeContext::new_mocked();
//! let root = search::make_proxy_object(&context, Arc::new(address), None).unwrap();
//! let eight = root.select_single("Key", filters! { "text" => "8" }).unwrap();
//! assert_eq!(eight.id(), 3);
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod backend;
pub mod config;
pub mod context;
#[cfg(feature = "dbus")]
pub mod dbus;
pub mod fake;
pub mod logging;
pub mod proxy;
pub mod query;
pub mod registry;
pub mod result;
pub mod search;
pub mod sleep;
pub mod timeout;
pub mod value;

pub use backend::{AddressKey, Backend, IpcAddress, QtInterface, Row, StateMap};
pub use config::{LogConfig, LogFormat, ProbeConfig};
pub use context::ProbeContext;
#[cfg(feature = "dbus")]
pub use dbus::{DbusAddress, DbusBus};
pub use logging::init_logging;
pub use proxy::{NoRefreshGuard, Properties, ProxyObject, QtProxy, QtSignalWatcher, Shape};
pub use query::{FilterValue, Filters, Query};
pub use registry::{
    Capability, ClassSpec, CustomProxy, Identity, ProxyClass, Registry, TypeSelector,
};
pub use result::{ProbeError, ProbeResult, TransportError};
pub use search::{ProcessSearch, SearchParams, SearchRequest};
pub use sleep::Sleeper;
pub use timeout::Timeout;
pub use value::{Color, Point, Point3D, PropertyValue, Rectangle, Size, Time};

// Derive macro for typed custom proxy classes
#[cfg(feature = "derive")]
pub use widgetprobe_derive::CustomProxy;

/// Everything a test usually needs
pub mod prelude {
    pub use super::filters;
    pub use super::search::{
        make_proxy_object, ProcessSearch, SearchParams, SearchRequest, SystemProcessTable,
    };
    pub use super::{
        Capability, ClassSpec, CustomProxy, FilterValue, Filters, ProbeConfig, ProbeContext,
        ProbeError, ProbeResult, PropertyValue, ProxyObject, Shape,
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::prelude::*;
    use super::*;
    use crate::fake::FakeAddress;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_prelude_walkthrough() {
        let address = Arc::new(FakeAddress::tree(vec![
            Row::new("/Notes", json!({"id": [0, 1]})),
            Row::new("/Notes/Editor", json!({"id": [0, 2], "text": [0, "draft"]})),
        ]));
        let context = ProbeContext::new_mocked();
        let root = make_proxy_object(&context, address, None).unwrap();
        let editor = root.select_single("Editor", filters! {}).unwrap();
        assert_eq!(editor.get("text").unwrap(), PropertyValue::from("draft"));
        assert_eq!(editor.get_parent().unwrap().id(), root.id());
    }

    #[test]
    fn test_error_display() {
        let err = ProbeError::not_found(Some("Editor"), &filters! { "text" => "x" });
        assert_eq!(
            err.to_string(),
            "Object not found with name 'Editor' and properties {'text': 'x'}."
        );
    }
}
