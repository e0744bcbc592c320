use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire value marking a key as removed from scope (distinct from `null`).
pub const DELETED_SENTINEL: &str = "<deleted>";

/// A single key change contributed by a step.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    Set(Value),
    Delete,
}

impl DiffOp {
    fn from_wire(value: Value) -> Self {
        match value {
            Value::String(s) if s == DELETED_SENTINEL => DiffOp::Delete,
            other => DiffOp::Set(other),
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            DiffOp::Set(value) => value.clone(),
            DiffOp::Delete => Value::String(DELETED_SENTINEL.to_string()),
        }
    }
}

/// Incremental scope change recorded on a step.
///
/// The backend may deliver a diff either as a JSON object or as a string holding
/// a JSON object (that is how it stores them). Anything else decodes to an empty
/// diff so that a bad diff never fails the surrounding step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    ops: BTreeMap<String, DiffOp>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.insert(key.into(), DiffOp::Set(value.into()));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.insert(key.into(), DiffOp::Delete);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn get(&self, key: &str) -> Option<&DiffOp> {
        self.ops.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DiffOp)> {
        self.ops.iter()
    }

    /// Fold this diff onto a cumulative mapping.
    pub fn apply_to(&self, target: &mut BTreeMap<String, Value>) {
        for (key, op) in &self.ops {
            match op {
                DiffOp::Set(value) => {
                    target.insert(key.clone(), value.clone());
                }
                DiffOp::Delete => {
                    target.remove(key);
                }
            }
        }
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Object(map) => Self {
                ops: map
                    .into_iter()
                    .map(|(key, value)| (key, DiffOp::from_wire(value)))
                    .collect(),
            },
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Self::default();
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Object(map)) => Self::from_value(Value::Object(map)),
                    Ok(Value::Null) => Self::default(),
                    Ok(other) => {
                        tracing::warn!(kind = json_kind(&other), "Ignoring non-object diff");
                        Self::default()
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unparseable diff");
                        Self::default()
                    }
                }
            }
            other => {
                tracing::warn!(kind = json_kind(&other), "Ignoring non-object diff");
                Self::default()
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<'de> Deserialize<'de> for Diff {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(Diff::from_value(raw))
    }
}

impl Serialize for Diff {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.ops.len()))?;
        for (key, op) in &self.ops {
            map.serialize_entry(key, &op.to_wire())?;
        }
        map.end()
    }
}
