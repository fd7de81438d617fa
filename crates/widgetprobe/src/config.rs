//! Configuration
//!
//! [`ProbeConfig`] carries the tunables shared by the whole toolkit: polling
//! budgets, the introspection endpoint names and logging. It loads from YAML,
//! any missing key falls back to its default, and `WIDGETPROBE_*` environment
//! variables override individual values.

use crate::result::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default object path exporting the introspection interface
pub const DEFAULT_OBJECT_PATH: &str = "/com/canonical/Autopilot/Introspection";

/// Name of the introspection interface
pub const INTROSPECTION_INTERFACE: &str = "com.canonical.Autopilot.Introspection";

/// Name of the Qt extension interface
pub const QT_INTERFACE: &str = "com.canonical.Autopilot.Qt";

/// Wire protocol version this crate speaks
pub const WIRE_PROTOCOL_VERSION: &str = "1.4";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Set the filter directive
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Toolkit-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Budget for connection search and `wait_*` defaults, in seconds
    pub default_timeout_secs: f64,
    /// Budget for slow operations, in seconds
    pub long_timeout_secs: f64,
    /// Row count above which a query is reported as slow
    pub large_result_warning: usize,
    /// Object path exporting the introspection interface
    pub object_path: String,
    /// Introspection interface name
    pub introspection_interface: String,
    /// Qt extension interface name
    pub qt_interface: String,
    /// Expected wire protocol version
    pub wire_protocol_version: String,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10.0,
            long_timeout_secs: 30.0,
            large_result_warning: 15,
            object_path: DEFAULT_OBJECT_PATH.to_string(),
            introspection_interface: INTROSPECTION_INTERFACE.to_string(),
            qt_interface: QT_INTERFACE.to_string(),
            wire_protocol_version: WIRE_PROTOCOL_VERSION.to_string(),
            log: LogConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from YAML
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is malformed or has wrongly typed keys
    pub fn from_yaml(yaml: &str) -> ProbeResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Serialize to YAML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_yaml(&self) -> ProbeResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Apply `WIDGETPROBE_*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override does not parse
    pub fn with_env_overrides(self) -> ProbeResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed like the environment
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override does not parse
    pub fn with_overrides_from<F>(mut self, lookup: F) -> ProbeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("WIDGETPROBE_DEFAULT_TIMEOUT") {
            self.default_timeout_secs = parse_number("WIDGETPROBE_DEFAULT_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("WIDGETPROBE_LONG_TIMEOUT") {
            self.long_timeout_secs = parse_number("WIDGETPROBE_LONG_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("WIDGETPROBE_LARGE_RESULT_WARNING") {
            self.large_result_warning = parse_number("WIDGETPROBE_LARGE_RESULT_WARNING", &value)?;
        }
        if let Some(value) = lookup("WIDGETPROBE_OBJECT_PATH") {
            self.object_path = value;
        }
        if let Some(value) = lookup("WIDGETPROBE_LOG") {
            self.log.level = value;
        }
        if let Some(value) = lookup("WIDGETPROBE_LOG_FORMAT") {
            self.log.format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ProbeError::Config {
                        message: format!("WIDGETPROBE_LOG_FORMAT: unknown format '{other}'"),
                    })
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> ProbeResult<()> {
        if self.default_timeout_secs < 0.0 || self.long_timeout_secs < 0.0 {
            return Err(ProbeError::Config {
                message: "timeouts must not be negative".to_string(),
            });
        }
        if !self.object_path.starts_with('/') {
            return Err(ProbeError::Config {
                message: format!("object path '{}' must be absolute", self.object_path),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ProbeResult<T> {
    value.trim().parse().map_err(|_| ProbeError::Config {
        message: format!("{key}: '{value}' is not a valid number"),
    })
}
