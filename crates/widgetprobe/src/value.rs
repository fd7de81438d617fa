//! Typed property values.
//!
//! Every attribute in a state row arrives as `[type_id, component, ...]`.
//! [`PropertyValue::from_wire`] turns that into a typed value: plain data,
//! or one of the geometry, color and time structures the introspection
//! protocol knows about.

use crate::query::FilterValue;
use crate::result::{ProbeError, ProbeResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Wire type identifiers
pub mod type_id {
    /// Plain value (bool, number, string, list, map)
    pub const PLAIN: i64 = 0;
    /// Rectangle: x, y, width, height
    pub const RECTANGLE: i64 = 1;
    /// Point: x, y
    pub const POINT: i64 = 2;
    /// Size: width, height
    pub const SIZE: i64 = 3;
    /// Color: red, green, blue, alpha
    pub const COLOR: i64 = 4;
    /// Date and time: unix timestamp
    pub const DATETIME: i64 = 5;
    /// Time of day: hour, minute, second, millisecond
    pub const TIME: i64 = 6;
    /// 3D point: x, y, z
    pub const POINT3D: i64 = 7;
}

/// Axis aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// Left edge
    pub x: i64,
    /// Top edge
    pub y: i64,
    /// Width
    pub width: i64,
    /// Height
    pub height: i64,
}

impl Rectangle {
    /// Create a rectangle
    #[must_use]
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center of the rectangle, rounded down
    #[must_use]
    pub const fn center(&self) -> (i64, i64) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// 2D point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    /// X coordinate
    pub x: i64,
    /// Y coordinate
    pub y: i64,
}

/// 2D size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    /// Width
    pub width: i64,
    /// Height
    pub height: i64,
}

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red channel
    pub red: i64,
    /// Green channel
    pub green: i64,
    /// Blue channel
    pub blue: i64,
    /// Alpha channel
    pub alpha: i64,
}

/// Time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Time {
    /// Hour
    pub hour: i64,
    /// Minute
    pub minute: i64,
    /// Second
    pub second: i64,
    /// Millisecond
    pub millisecond: i64,
}

/// 3D point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point3D {
    /// X coordinate
    pub x: i64,
    /// Y coordinate
    pub y: i64,
    /// Z coordinate
    pub z: i64,
}

/// Value of one proxy object attribute
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Missing value
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Text(String),
    /// Ordered list
    List(Vec<PropertyValue>),
    /// String keyed map
    Map(BTreeMap<String, PropertyValue>),
    /// Rectangle
    Rectangle(Rectangle),
    /// Point
    Point(Point),
    /// Size
    Size(Size),
    /// Color
    Color(Color),
    /// UTC date and time
    DateTime(DateTime<Utc>),
    /// Time of day
    Time(Time),
    /// 3D point
    Point3D(Point3D),
}

impl PropertyValue {
    /// Build a value from its wire form `[type_id, component, ...]`.
    ///
    /// Unknown type ids are logged and treated as plain values.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidArgument`] when the wire value is not an
    /// array, carries no data, or has the wrong number of components
    pub fn from_wire(wire: &Value) -> ProbeResult<Self> {
        let items = wire.as_array().ok_or_else(|| {
            ProbeError::invalid_argument(format!("Expected [type_id, data...], got {wire}"))
        })?;
        let (type_tag, data) = items
            .split_first()
            .ok_or_else(|| ProbeError::invalid_argument("Cannot create attribute, no data supplied"))?;
        let mut type_tag = type_tag.as_i64().ok_or_else(|| {
            ProbeError::invalid_argument(format!("Type id must be an integer, got {type_tag}"))
        })?;
        if !(type_id::PLAIN..=type_id::POINT3D).contains(&type_tag) {
            tracing::warn!("Unknown type id {}", type_tag);
            type_tag = type_id::PLAIN;
        }
        if data.is_empty() {
            return Err(ProbeError::invalid_argument(
                "Cannot create attribute, no data supplied",
            ));
        }

        let value = match type_tag {
            type_id::RECTANGLE => {
                let [x, y, width, height] = components::<4>("Rectangle", data)?;
                Self::Rectangle(Rectangle::new(x, y, width, height))
            }
            type_id::POINT => {
                let [x, y] = components::<2>("Point", data)?;
                Self::Point(Point { x, y })
            }
            type_id::SIZE => {
                let [width, height] = components::<2>("Size", data)?;
                Self::Size(Size { width, height })
            }
            type_id::COLOR => {
                let [red, green, blue, alpha] = components::<4>("Color", data)?;
                Self::Color(Color {
                    red,
                    green,
                    blue,
                    alpha,
                })
            }
            type_id::DATETIME => {
                let [timestamp] = components::<1>("DateTime", data)?;
                let when = DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
                    ProbeError::invalid_argument(format!("Timestamp {timestamp} is out of range"))
                })?;
                Self::DateTime(when)
            }
            type_id::TIME => {
                let [hour, minute, second, millisecond] = components::<4>("Time", data)?;
                Self::Time(Time {
                    hour,
                    minute,
                    second,
                    millisecond,
                })
            }
            type_id::POINT3D => {
                let [x, y, z] = components::<3>("Point3D", data)?;
                Self::Point3D(Point3D { x, y, z })
            }
            _ if data.len() == 1 => Self::from_json(&data[0]),
            _ => Self::List(data.iter().map(Self::from_json).collect()),
        };
        Ok(value)
    }

    /// Convert untyped JSON into a plain value
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .unwrap_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Named component of a structured value.
    ///
    /// Geometry types answer both the long and the short names (`width` and
    /// `w`); maps answer their keys.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<PropertyValue> {
        let int = |v: i64| Some(Self::Int(v));
        match (self, name) {
            (Self::Rectangle(r), "x") => int(r.x),
            (Self::Rectangle(r), "y") => int(r.y),
            (Self::Rectangle(r), "width" | "w") => int(r.width),
            (Self::Rectangle(r), "height" | "h") => int(r.height),
            (Self::Point(p), "x") => int(p.x),
            (Self::Point(p), "y") => int(p.y),
            (Self::Size(s), "width" | "w") => int(s.width),
            (Self::Size(s), "height" | "h") => int(s.height),
            (Self::Color(c), "red") => int(c.red),
            (Self::Color(c), "green") => int(c.green),
            (Self::Color(c), "blue") => int(c.blue),
            (Self::Color(c), "alpha") => int(c.alpha),
            (Self::Time(t), "hour") => int(t.hour),
            (Self::Time(t), "minute") => int(t.minute),
            (Self::Time(t), "second") => int(t.second),
            (Self::Time(t), "millisecond") => int(t.millisecond),
            (Self::Point3D(p), "x") => int(p.x),
            (Self::Point3D(p), "y") => int(p.y),
            (Self::Point3D(p), "z") => int(p.z),
            (Self::DateTime(d), "timestamp") => int(d.timestamp()),
            (Self::Map(map), key) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// Whether this value equals a filter value
    #[must_use]
    pub fn matches(&self, filter: &FilterValue) -> bool {
        match (self, filter) {
            (Self::Bool(a), FilterValue::Bool(b)) => a == b,
            (Self::Int(a), FilterValue::Int(b)) => a == b,
            (Self::Int(a), FilterValue::Float(b)) => (*a as f64) == *b,
            (Self::Float(a), FilterValue::Float(b)) => a == b,
            (Self::Float(a), FilterValue::Int(b)) => *a == (*b as f64),
            (Self::Text(a), FilterValue::Text(b)) => a == b,
            (Self::Text(a), FilterValue::Bytes(b)) => a.as_bytes() == b.as_slice(),
            _ => false,
        }
    }

    /// Total order used to sort objects by attribute values.
    ///
    /// Numbers compare numerically across integer and float; values of
    /// different kinds order by kind.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0));
                a.total_cmp(&b)
            }
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.sort_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::List(_) => 4,
            Self::Map(_) => 5,
            Self::Rectangle(_) => 6,
            Self::Point(_) => 7,
            Self::Size(_) => 8,
            Self::Color(_) => 9,
            Self::DateTime(_) => 10,
            Self::Time(_) => 11,
            Self::Point3D(_) => 12,
        }
    }

    /// Boolean value, if this is one
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value, if this is one
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as float
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text value, if this is one
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Rectangle value, if this is one
    #[must_use]
    pub const fn as_rectangle(&self) -> Option<Rectangle> {
        match self {
            Self::Rectangle(r) => Some(*r),
            _ => None,
        }
    }

    /// List items, if this is a list
    #[must_use]
    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

fn components<const N: usize>(type_name: &str, data: &[Value]) -> ProbeResult<[i64; N]> {
    if data.len() != N {
        return Err(ProbeError::invalid_argument(format!(
            "{type_name} must be constructed with {N} arguments, not {}",
            data.len()
        )));
    }
    let mut out = [0_i64; N];
    for (slot, item) in out.iter_mut().zip(data) {
        *slot = match item.as_i64() {
            Some(v) => v,
            None => item
                .as_f64()
                .map(|f| f as i64)
                .ok_or_else(|| {
                    ProbeError::invalid_argument(format!(
                        "{type_name} components must be numbers, got {item}"
                    ))
                })?,
        };
    }
    Ok(out)
}

fn write_text_repr(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    write!(f, "'")?;
    for c in text.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '\'' => write!(f, "\\'")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "'")
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Text(s) => write_text_repr(f, s),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_text_repr(f, key)?;
                    write!(f, ": {value}")?;
                }
                write!(f, "}}")
            }
            Self::Rectangle(r) => {
                write!(f, "Rectangle({}, {}, {}, {})", r.x, r.y, r.width, r.height)
            }
            Self::Point(p) => write!(f, "Point({}, {})", p.x, p.y),
            Self::Size(s) => write!(f, "Size({}, {})", s.width, s.height),
            Self::Color(c) => write!(f, "Color({}, {}, {}, {})", c.red, c.green, c.blue, c.alpha),
            Self::DateTime(d) => write!(f, "DateTime({})", d.format("%Y-%m-%dT%H:%M:%SZ")),
            Self::Time(t) => write!(
                f,
                "Time({}, {}, {}, {})",
                t.hour, t.minute, t.second, t.millisecond
            ),
            Self::Point3D(p) => write!(f, "Point3D({}, {}, {})", p.x, p.y, p.z),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    mod wire_tests {
        use super::*;

        #[test]
        fn test_plain_scalars() {
            assert_eq!(
                PropertyValue::from_wire(&json!([0, true])).unwrap(),
                PropertyValue::Bool(true)
            );
            assert_eq!(
                PropertyValue::from_wire(&json!([0, 12])).unwrap(),
                PropertyValue::Int(12)
            );
            assert_eq!(
                PropertyValue::from_wire(&json!([0, 1.5])).unwrap(),
                PropertyValue::Float(1.5)
            );
            assert_eq!(
                PropertyValue::from_wire(&json!([0, "hi"])).unwrap(),
                PropertyValue::Text("hi".into())
            );
        }

        #[test]
        fn test_plain_multiple_values_become_list() {
            let value = PropertyValue::from_wire(&json!([0, 1, "two"])).unwrap();
            assert_eq!(
                value,
                PropertyValue::List(vec![PropertyValue::Int(1), PropertyValue::Text("two".into())])
            );
        }

        #[test]
        fn test_rectangle() {
            let value = PropertyValue::from_wire(&json!([1, 10, 20, 30, 40])).unwrap();
            let rect = value.as_rectangle().unwrap();
            assert_eq!(rect, Rectangle::new(10, 20, 30, 40));
            assert_eq!(rect.center(), (25, 40));
            assert_eq!(value.field("w"), Some(PropertyValue::Int(30)));
            assert_eq!(value.field("height"), Some(PropertyValue::Int(40)));
        }

        #[test]
        fn test_structured_types() {
            assert_eq!(
                PropertyValue::from_wire(&json!([2, 3, 4])).unwrap(),
                PropertyValue::Point(Point { x: 3, y: 4 })
            );
            assert_eq!(
                PropertyValue::from_wire(&json!([3, 640, 480])).unwrap(),
                PropertyValue::Size(Size {
                    width: 640,
                    height: 480
                })
            );
            let color = PropertyValue::from_wire(&json!([4, 255, 0, 0, 128])).unwrap();
            assert_eq!(color.field("alpha"), Some(PropertyValue::Int(128)));
            let time = PropertyValue::from_wire(&json!([6, 12, 30, 5, 250])).unwrap();
            assert_eq!(time.to_string(), "Time(12, 30, 5, 250)");
            let point = PropertyValue::from_wire(&json!([7, 1, 2, 3])).unwrap();
            assert_eq!(point.field("z"), Some(PropertyValue::Int(3)));
        }

        #[test]
        fn test_datetime() {
            let value = PropertyValue::from_wire(&json!([5, 1_000_000_000])).unwrap();
            assert_eq!(value.to_string(), "DateTime(2001-09-09T01:46:40Z)");
            assert_eq!(value.field("timestamp"), Some(PropertyValue::Int(1_000_000_000)));
        }

        #[test]
        fn test_wrong_arity_is_error() {
            let err = PropertyValue::from_wire(&json!([1, 1, 2])).unwrap_err();
            assert!(err
                .to_string()
                .contains("Rectangle must be constructed with 4 arguments, not 2"));
        }

        #[test]
        fn test_no_data_is_error() {
            let err = PropertyValue::from_wire(&json!([0])).unwrap_err();
            assert!(err.to_string().contains("no data supplied"));
            assert!(PropertyValue::from_wire(&json!([])).is_err());
            assert!(PropertyValue::from_wire(&json!("bare")).is_err());
        }

        #[test]
        fn test_unknown_type_is_plain() {
            assert_eq!(
                PropertyValue::from_wire(&json!([99, 1, 2])).unwrap(),
                PropertyValue::List(vec![PropertyValue::Int(1), PropertyValue::Int(2)])
            );
        }
    }

    mod compare_tests {
        use super::*;

        #[test]
        fn test_matches_filters() {
            assert!(PropertyValue::Int(3).matches(&FilterValue::Int(3)));
            assert!(PropertyValue::Int(3).matches(&FilterValue::Float(3.0)));
            assert!(PropertyValue::Float(0.5).matches(&FilterValue::Float(0.5)));
            assert!(PropertyValue::Text("a".into()).matches(&FilterValue::Bytes(b"a".to_vec())));
            assert!(!PropertyValue::Bool(true).matches(&FilterValue::Int(1)));
            assert!(!PropertyValue::Text("a".into()).matches(&FilterValue::Text("b".into())));
        }

        #[test]
        fn test_sort_cmp_numbers() {
            assert_eq!(
                PropertyValue::Int(2).sort_cmp(&PropertyValue::Float(2.5)),
                Ordering::Less
            );
            assert_eq!(
                PropertyValue::Text("b".into()).sort_cmp(&PropertyValue::Text("a".into())),
                Ordering::Greater
            );
        }

        #[test]
        fn test_repr() {
            let map = PropertyValue::from_json(&json!({"k": [1, "x'y"], "b": null}));
            assert_eq!(map.to_string(), "{'b': None, 'k': [1, 'x\\'y']}");
            assert_eq!(PropertyValue::Float(1.0).to_string(), "1.0");
        }
    }
}
