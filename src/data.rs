// SPDX-License-Identifier: Apache-2.0 OR MIT
// Structured key-value payloads attached to records

use std::collections::HashMap;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// A single structured field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Instant(SystemTime),
    Strings(Vec<String>),
    Integers(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
}

impl FieldValue {
    /// Render as a JSON value for the structured formatter family
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::from(s.as_str()),
            FieldValue::I64(v) => Value::from(*v),
            FieldValue::U64(v) => Value::from(*v),
            FieldValue::F64(v) => Value::from(*v),
            FieldValue::Bool(v) => Value::from(*v),
            FieldValue::Instant(t) => {
                let ts: DateTime<Utc> = (*t).into();
                Value::from(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            FieldValue::Strings(v) => Value::from(v.clone()),
            FieldValue::Integers(v) => Value::from(v.clone()),
            FieldValue::Floats(v) => Value::from(v.clone()),
            FieldValue::Bools(v) => Value::from(v.clone()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I64(v.into())
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U64(v.into())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F64(v.into())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<SystemTime> for FieldValue {
    fn from(v: SystemTime) -> Self {
        FieldValue::Instant(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::Strings(v)
    }
}

impl From<Vec<i64>> for FieldValue {
    fn from(v: Vec<i64>) -> Self {
        FieldValue::Integers(v)
    }
}

impl From<Vec<f64>> for FieldValue {
    fn from(v: Vec<f64>) -> Self {
        FieldValue::Floats(v)
    }
}

impl From<Vec<bool>> for FieldValue {
    fn from(v: Vec<bool>) -> Self {
        FieldValue::Bools(v)
    }
}

/// String-keyed structured context carried by a record.
///
/// Keys are unique; `add` overwrites. The map is deep-copied into the record
/// at log time, so callers keep ownership of their own instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredData {
    fields: HashMap<String, FieldValue>,
}

impl StructuredData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a field
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.fields.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Merge `other` into self; on key collision `other` wins
    pub fn merge(&mut self, other: &StructuredData) -> &mut Self {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render the whole map as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}
