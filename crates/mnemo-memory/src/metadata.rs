//! Open-schema metadata document attached to memory records.
//!
//! Metadata is an ordered mapping of string keys to JSON values. Updates use
//! [`Metadata::merge`], a shallow override: keys in the patch replace keys in
//! the document, every other key survives. Filters use
//! [`Metadata::contains`], a shallow containment check.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MemoryError, Result};

/// Typed metadata document (string → JSON value, ordered by key).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from an arbitrary JSON value.
    ///
    /// Only JSON objects are accepted; anything else is malformed metadata.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(MemoryError::InvalidArgument(format!(
                "metadata must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a document from its JSON text form.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of a key, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Shallow-merge `patch` into this document. Patch keys win.
    pub fn merge(&mut self, patch: &Metadata) {
        for (key, value) in &patch.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Consuming variant of [`merge`](Self::merge).
    pub fn merged(mut self, patch: &Metadata) -> Self {
        self.merge(patch);
        self
    }

    /// Whether every key of `filter` is present here with an equal value.
    ///
    /// An empty filter is contained in every document.
    pub fn contains(&self, filter: &Metadata) -> bool {
        filter
            .0
            .iter()
            .all(|(key, expected)| self.0.get(key) == Some(expected))
    }

    /// Serialize to compact JSON text (storage form).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Metadata {
    type Error = MemoryError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
