//! Message metadata.

use std::collections::HashMap;
use std::collections::hash_map;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata key holding the identifier of the message that started a flow.
pub const CORRELATION_ID: &str = "correlation_id";

/// Metadata key holding the identifier of the message that directly caused this one.
pub const CAUSATION_ID: &str = "causation_id";

/// An unordered string → JSON value map attached to every message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaData(HashMap<String, Value>);

impl MetaData {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates metadata holding a single entry.
    pub fn with(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = HashMap::with_capacity(1);
        map.insert(key.into(), value.into());
        Self(map)
    }

    /// Returns a copy with `key` set to `value`.
    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a copy with every entry of `other` added, overriding existing keys.
    pub fn merged_with(mut self, other: &MetaData) -> Self {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    /// Returns a copy without `key`.
    pub fn without(mut self, key: &str) -> Self {
        self.0.remove(key);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the entry as a string slice, if it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl From<HashMap<String, Value>> for MetaData {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for MetaData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a MetaData {
    type Item = (&'a String, &'a Value);
    type IntoIter = hash_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
