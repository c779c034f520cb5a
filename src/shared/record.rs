//! Dataset-agnostic record types produced by collectors.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::shared::error::NormalizationError;

/// A single value inside a raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    List(Vec<FieldValue>),
    Map(RawRecord),
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Str(v.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl From<RawRecord> for FieldValue {
    fn from(v: RawRecord) -> Self {
        FieldValue::Map(v)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        FieldValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl FieldValue {
    /// Converts into JSON, rejecting values JSON cannot carry.
    pub fn to_json(&self, path: &str) -> Result<Value, NormalizationError> {
        Ok(match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::Number((*i).into()),
            FieldValue::UInt(u) => Value::Number((*u).into()),
            FieldValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| NormalizationError::NonFiniteFloat(path.to_string()))?,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json(path))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            FieldValue::Map(record) => Value::Object(fields_to_json(&record.fields, path)?),
        })
    }
}

/// Dataset-specific fields produced by one collector invocation.
///
/// Field names may contain dots; they are expanded into nested objects when
/// the record is normalized. Root fields live outside the dataset namespace
/// (for example `event.action`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
    root: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds the field only when a value is present.
    pub fn with_opt<V: Into<FieldValue>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    pub fn with_root(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.root.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn root_get(&self, key: &str) -> Option<&FieldValue> {
        self.root.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub(crate) fn root(&self) -> &BTreeMap<String, FieldValue> {
        &self.root
    }
}

/// Expands dotted keys into nested JSON objects.
pub(crate) fn fields_to_json(
    fields: &BTreeMap<String, FieldValue>,
    parent: &str,
) -> Result<Map<String, Value>, NormalizationError> {
    let mut out = Map::new();
    for (key, value) in fields {
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(NormalizationError::EmptyKey);
        }
        let path = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}.{key}")
        };
        put_dotted(&mut out, key, value.to_json(&path)?);
    }
    Ok(out)
}

/// Inserts `value` at a dotted path, merging with existing objects.
pub(crate) fn put_dotted(target: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    put_dotted(existing, &k, v);
                }
            }
            (_, value) => {
                target.insert(key.to_string(), value);
            }
        },
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                put_dotted(map, rest, value);
            }
        }
    }
}

/// Outcome of one successful collector invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    pub records: Vec<RawRecord>,
    /// Set when the collector could only observe part of the system.
    pub degraded: bool,
}

impl Collection {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            degraded: false,
        }
    }

    pub fn single(record: RawRecord) -> Self {
        Self::new(vec![record])
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_keys_expand_into_nested_objects() {
        let record = RawRecord::new()
            .with("os.name", "Ubuntu")
            .with("os.family", "debian")
            .with("uptime", 42u64);

        let json = fields_to_json(record.fields(), "").unwrap();
        assert_eq!(
            Value::Object(json),
            json!({"os": {"name": "Ubuntu", "family": "debian"}, "uptime": 42})
        );
    }

    #[test]
    fn nested_records_and_lists_convert() {
        let iface = RawRecord::new().with("name", "lo").with("ip", vec!["127.0.0.1"]);
        let record = RawRecord::new().with("network.interfaces", vec![iface]);

        let json = fields_to_json(record.fields(), "").unwrap();
        assert_eq!(
            json["network"]["interfaces"][0]["ip"][0],
            json!("127.0.0.1")
        );
    }

    #[test]
    fn non_finite_float_is_rejected_with_path() {
        let record = RawRecord::new().with("cpu.pct", f64::NAN);
        let err = fields_to_json(record.fields(), "system.host").unwrap_err();
        assert_eq!(
            err,
            NormalizationError::NonFiniteFloat("system.host.cpu.pct".into())
        );
    }

    #[test]
    fn empty_key_segments_are_rejected() {
        let record = RawRecord::new().with("os..name", "x");
        assert_eq!(
            fields_to_json(record.fields(), "").unwrap_err(),
            NormalizationError::EmptyKey
        );
    }

    #[test]
    fn with_opt_skips_missing_values() {
        let record = RawRecord::new()
            .with_opt("release", None::<String>)
            .with_opt("arch", Some("amd64"));
        assert!(record.get("release").is_none());
        assert_eq!(record.get("arch"), Some(&FieldValue::Str("amd64".into())));
    }
}
