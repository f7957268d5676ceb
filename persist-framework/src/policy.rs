//! Hierarchical, immutable configuration trees.
//!
//! A [`Policy`] is a tree of JSON values addressed by dotted paths
//! (`"compression.level"`). Policies are built once, through
//! [`PolicyBuilder`] or by loading a JSON document, and are read-only after
//! that; formatters hold them behind an [`Arc`] and may cache themselves by
//! the policy's [`fingerprint`](Policy::fingerprint).

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::{PersistError, Result};

/// Shared handle to an immutable policy
pub type PolicyPtr = Arc<Policy>;

/// Immutable hierarchical key/value tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    root: Map<String, Value>,
}

impl Policy {
    /// Create a policy with no keys
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a policy key by key
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Wrap a JSON object as a policy
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the value is not a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(PersistError::configuration(format!(
                "Policy document must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse a policy from a JSON document
    pub fn from_json_str(document: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(document)
            .map_err(|e| PersistError::configuration(format!("Invalid policy document: {e}")))?;
        Self::from_value(value)
    }

    /// Load a policy from a JSON file on disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let document = fs::read_to_string(path).map_err(|e| {
            PersistError::configuration(format!(
                "Failed to read policy file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&document)
    }

    /// Resolve a dotted path to the value stored there
    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let mut current = self.root.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Check whether a dotted path is present
    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Read an optional key, falling back to `default` when it is absent
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the key is present with a value
    ///   that does not convert to `T`
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.lookup(key) {
            Some(value) => convert(key, value),
            None => Ok(default),
        }
    }

    /// Read a mandatory key
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the key is absent or has the wrong type
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| PersistError::configuration(format!("Missing mandatory policy key '{key}'")))?;
        convert(key, value)
    }

    /// Extract the subtree at `key`; an absent key yields an empty policy
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the key holds a non-object value
    pub fn sub_policy(&self, key: &str) -> Result<Policy> {
        match self.lookup(key) {
            None => Ok(Policy::empty()),
            Some(Value::Object(map)) => Ok(Policy { root: map.clone() }),
            Some(other) => Err(PersistError::configuration(format!(
                "Policy key '{key}' holds {} where a sub-policy was expected",
                json_type_name(other)
            ))),
        }
    }

    /// Top-level key names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Normalized identity of this policy's content
    ///
    /// Two policies with the same keys and values produce the same
    /// fingerprint regardless of the order they were built in.
    pub fn fingerprint(&self) -> String {
        let mut canonical = Vec::new();
        write_canonical(&Value::Object(self.root.clone()), &mut canonical);
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    /// Copy of the tree as a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }
}

/// Incremental constructor for [`Policy`]
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    root: Map<String, Value>,
}

impl PolicyBuilder {
    /// Set a dotted path, creating intermediate levels as needed
    ///
    /// An intermediate level that already holds a scalar is replaced by a
    /// nested object.
    pub fn set<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        let segments: Vec<&str> = key.split('.').collect();
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return self,
        };

        let mut current = &mut self.root;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just made an object"),
            };
        }
        current.insert(last.to_string(), value.into());
        self
    }

    /// Graft an existing policy under `key`
    pub fn set_policy(self, key: &str, policy: &Policy) -> Self {
        self.set(key, policy.to_value())
    }

    pub fn build(self) -> Policy {
        Policy { root: self.root }
    }
}

fn convert<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T> {
    T::deserialize(value).map_err(|e| {
        PersistError::configuration(format!("Invalid value for policy key '{key}': {e}"))
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// Keys are emitted in sorted order so the fingerprint does not depend on
// whether serde_json preserves insertion order.
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                write_canonical(&map[key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}
