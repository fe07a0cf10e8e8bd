//! Engine-neutral values produced by the executors
//!
//! Every engine converts its native row/document representation into these
//! types before results leave the executor boundary, so the normalizer never
//! has to probe driver-specific types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

/// A single value inside a record or row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Document identifier (MongoDB ObjectId), kept as its 24-char hex form
    ObjectId(String),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Document(Record),
}

impl Value {
    /// Convert to JSON; identifiers and timestamps become strings
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::ObjectId(oid) => JsonValue::String(oid.clone()),
            Value::DateTime(dt) => JsonValue::String(format_datetime(dt)),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(record) => record.to_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::ObjectId(oid) => f.write_str(oid),
            Value::DateTime(dt) => f.write_str(&format_datetime(dt)),
            Value::Array(_) | Value::Document(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .unwrap_or_else(|| Value::Text(n.to_string())),
            },
            JsonValue::String(s) => Value::Text(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Document(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// RFC 3339 with millisecond precision, always UTC
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ordered field name -> value mapping; insertion order is preserved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

/// Build a [`Record`] from `key => value` pairs
#[macro_export]
macro_rules! record {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut record = $crate::value::Record::new();
        $(record.insert($key, $crate::value::Value::from($value));)*
        record
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_preserves_insertion_order() {
        let record = record! { "name" => "Alice", "age" => 30i64, "city" => "Paris" };
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["name", "age", "city"]);
    }

    #[test]
    fn test_record_insert_replaces_in_place() {
        let mut record = record! { "a" => 1i64, "b" => 2i64 };
        record.insert("a", Value::Int(10));
        let pairs: Vec<(&str, &Value)> = record.iter().collect();
        assert_eq!(pairs, vec![("a", &Value::Int(10)), ("b", &Value::Int(2))]);
    }

    #[test]
    fn test_nested_value_to_json_keeps_key_order() {
        let inner = record! { "z" => 1i64, "a" => 2i64 };
        let value = Value::Array(vec![Value::Document(inner), Value::Null]);
        assert_eq!(value.to_string(), r#"[{"z":1,"a":2},null]"#);
    }

    #[test]
    fn test_datetime_display() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2024-03-01T12:30:00.000Z");
    }

    #[test]
    fn test_from_json_keeps_object_order() {
        let json: JsonValue = serde_json::from_str(r#"{"b": [1, 2.5], "a": {"x": null}}"#).unwrap();
        let Value::Document(record) = Value::from(json) else {
            panic!("expected document");
        };
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(
            record.get("b"),
            Some(&Value::Array(vec![Value::Int(1), Value::Float(2.5)]))
        );
    }

    #[test]
    fn test_non_finite_float_to_json() {
        assert_eq!(Value::Float(f64::NAN).to_json(), JsonValue::String("NaN".to_string()));
    }
}
