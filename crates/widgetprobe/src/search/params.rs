//! Search parameters.

use std::fmt;

/// Value of a search parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Integer (pids)
    Int(i64),
    /// Text (names and paths)
    Text(String),
}

impl ParamValue {
    /// Integer value, if this is one
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    /// Text value, if this is one
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{}'", value.replace('\'', "\\'")),
        }
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Named search parameters, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    entries: Vec<(String, ParamValue)>,
}

impl SearchParams {
    /// No parameters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter by name, replacing an earlier value in place
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a parameter by name, replacing an earlier value in place
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Match connections owned by `pid` or one of its descendants
    #[must_use]
    pub fn pid(self, pid: u32) -> Self {
        self.with("pid", pid)
    }

    /// Match one connection name
    #[must_use]
    pub fn connection_name(self, name: &str) -> Self {
        self.with("connection_name", name)
    }

    /// Match the type name of the application root
    #[must_use]
    pub fn application_name(self, name: &str) -> Self {
        self.with("application_name", name)
    }

    /// Object path exporting the introspection interface
    #[must_use]
    pub fn object_path(self, path: &str) -> Self {
        self.with("object_path", path)
    }

    /// Look up a parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Text parameter
    #[must_use]
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_text)
    }

    /// Requested pid, if any
    #[must_use]
    pub fn get_pid(&self) -> Option<u32> {
        self.get("pid")
            .and_then(ParamValue::as_int)
            .and_then(|pid| u32::try_from(pid).ok())
    }

    /// Whether a parameter is set
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether there are no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Human readable criteria, e.g. `pid = 123, object path = '/x'`
#[must_use]
pub fn criteria_string(params: &SearchParams, process_pid: Option<u32>) -> String {
    let mut parts: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{} = {value}", key.replace('_', " ")))
        .collect();
    if let Some(pid) = process_pid {
        parts.push(format!("process object = <process {pid}>"));
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_insertion_order() {
        let params = SearchParams::new().pid(123).object_path("/com/example");
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["pid", "object_path"]);
        assert_eq!(params.get_pid(), Some(123));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let params = SearchParams::new()
            .pid(1)
            .application_name("a")
            .pid(2);
        assert_eq!(params.iter().count(), 2);
        assert_eq!(params.get_pid(), Some(2));
    }

    #[test]
    fn test_criteria_string() {
        let params = SearchParams::new().pid(123).object_path("/x");
        assert_eq!(criteria_string(&params, None), "pid = 123, object path = '/x'");
        assert_eq!(
            criteria_string(&SearchParams::new(), Some(9)),
            "process object = <process 9>"
        );
    }
}
