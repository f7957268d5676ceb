/*!
Ordered collections of named, typed values.

`PropertySet` is the persistable handled by the bundled formatter, and the
carrier for out-of-band `additionalData` passed alongside every formatter
call (a destination table name, an item name, and so on).
*/

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;

use crate::persistable::{Persistable, TypeTagged};

/// A single typed property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl PropertyValue {
    /// Human-readable name of the value's type
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
            PropertyValue::DateTime(_) => "datetime",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v}"),
            PropertyValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(v)
    }
}

/// Insertion-ordered collection of named typed values
///
/// # Example
/// ```rust
/// use persist_framework::PropertySet;
///
/// let visit = PropertySet::new()
///     .with("visitId", 903334)
///     .with("filter", "r")
///     .with("exposureTime", 30.0);
/// assert_eq!(visit.get("filter").and_then(|v| v.as_str()), Some("r"));
/// assert_eq!(visit.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set)
    pub fn with<N: Into<String>, V: Into<PropertyValue>>(mut self, name: N, value: V) -> Self {
        self.set(name, value);
        self
    }

    /// Set a property; an existing name keeps its position and takes the new value
    pub fn set<N: Into<String>, V: Into<PropertyValue>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Convenience accessor for string-valued properties
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TypeTagged for PropertySet {
    const TYPE_TAG: &'static str = "PropertySet";
}

impl Persistable for PropertySet {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_insertion_order_is_preserved() {
        let set = PropertySet::new()
            .with("zeta", 1)
            .with("alpha", 2)
            .with("mid", 3);
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut set = PropertySet::new().with("a", 1).with("b", 2);
        set.set("a", "replaced");
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(set.get_str("a"), Some("replaced"));
    }

    #[test]
    fn test_remove() {
        let mut set = PropertySet::new().with("a", 1).with("b", true);
        assert_eq!(set.remove("a"), Some(PropertyValue::Int(1)));
        assert_eq!(set.remove("a"), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_value_accessors() {
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let set = PropertySet::new()
            .with("flag", true)
            .with("count", 7i64)
            .with("ratio", 0.25)
            .with("taken", when);

        assert_eq!(set.get("flag").and_then(PropertyValue::as_bool), Some(true));
        assert_eq!(set.get("count").and_then(PropertyValue::as_i64), Some(7));
        assert_eq!(set.get("count").and_then(PropertyValue::as_f64), Some(7.0));
        assert_eq!(set.get("taken"), Some(&PropertyValue::DateTime(when)));
        assert_eq!(set.get("taken").map(|v| v.type_name()), Some("datetime"));
    }

    #[test]
    fn test_persistable_downcast() {
        let boxed: Box<dyn Persistable> = Box::new(PropertySet::new().with("a", 1));
        assert_eq!(boxed.type_tag(), "PropertySet");
        assert!(boxed.is::<PropertySet>());
        let set = boxed.downcast::<PropertySet>().unwrap();
        assert_eq!(set.len(), 1);
    }
}
