//! Serializable value domain shared by parameters, arguments and results.

use std::cmp::Ordering;
use std::fmt::{self, Write as _};

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::entry::EntryId;
use crate::markers::ESCAPE;

/// Insertion-ordered string-keyed map.
pub type Map = IndexMap<String, Value>;

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(Map),
    /// Handle to an entry of the owning kernel.
    Entry(EntryId),
    /// Sentinel bound to `__record_entry__` when no call record is produced.
    Unbound,
}

impl Value {
    /// Interpret a textual literal: integer first, then float, otherwise text.
    pub fn coerce_scalar(text: &str) -> Value {
        if let Ok(int) = text.parse::<i64>() {
            return Value::Int(int);
        }
        match text.parse::<f64>() {
            Ok(float) if float.is_finite() && looks_numeric(text) => Value::Float(float),
            _ => Value::Text(text.to_string()),
        }
    }

    /// Wrap a value so the interpreter hands it back untouched.
    pub fn escaped(value: Value) -> Value {
        let mut map = Map::with_capacity(1);
        map.insert(ESCAPE.to_string(), value);
        Value::Map(map)
    }

    pub fn from_json(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(int) => Value::Int(int),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::Text(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON, asking `pickle` how to represent entry handles.
    pub fn to_json_with(&self, pickle: &mut dyn FnMut(EntryId) -> JsonValue) -> JsonValue {
        match self {
            Value::Null | Value::Unbound => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::List(items) => {
                JsonValue::Array(items.iter().map(|item| item.to_json_with(pickle)).collect())
            }
            Value::Map(map) => {
                let mut out = JsonMap::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), value.to_json_with(pickle));
                }
                JsonValue::Object(out)
            }
            Value::Entry(id) => pickle(*id),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Unbound)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_entry(&self) -> Option<EntryId> {
        match self {
            Value::Entry(id) => Some(*id),
            _ => None,
        }
    }

    /// Empty containers, zero, empty text, false and null are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null | Value::Unbound => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Entry(_) => true,
        }
    }

    /// Equality where integers and floats compare numerically.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering across numbers or across texts; anything else is unordered.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Entry(_) => "entry",
            Value::Unbound => "unbound",
        }
    }

    /// Deterministic rendering with sorted map keys, used for cache keys.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    pub(crate) fn write_canonical(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("null"),
            Value::Unbound => out.push_str("<unbound>"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Float(f) => {
                let _ = write!(out, "{f:?}");
            }
            Value::Text(s) => write_quoted(out, s),
            Value::List(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (idx, key) in keys.into_iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    write_quoted(out, key);
                    out.push(':');
                    map[key.as_str()].write_canonical(out);
                }
                out.push('}');
            }
            Value::Entry(id) => {
                let _ = write!(out, "<entry{id}>");
            }
        }
    }
}

fn write_quoted(out: &mut String, text: &str) {
    match serde_json::to_string(text) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            let _ = write!(out, "{text:?}");
        }
    }
}

// `f64::from_str` also accepts "inf" and "nan" spellings.
fn looks_numeric(text: &str) -> bool {
    text.bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Entry(id) => write!(f, "<entry{id}>"),
            other => f.write_str(&other.canonical()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl From<EntryId> for Value {
    fn from(value: EntryId) -> Self {
        Value::Entry(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerce_prefers_int_then_float() {
        assert_eq!(Value::coerce_scalar("42"), Value::Int(42));
        assert_eq!(Value::coerce_scalar("-3"), Value::Int(-3));
        assert_eq!(Value::coerce_scalar("2.5"), Value::Float(2.5));
        assert_eq!(Value::coerce_scalar("inf"), Value::Text("inf".into()));
        assert_eq!(Value::coerce_scalar("abc"), Value::Text("abc".into()));
    }

    #[test]
    fn canonical_sorts_map_keys() {
        let a = Value::from(json!({"b": 1, "a": [true, null, "x"]}));
        let b = Value::from(json!({"a": [true, null, "x"], "b": 1}));
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), r#"{"a":[true,null,"x"],"b":1}"#);
    }

    #[test]
    fn json_preserves_insertion_order() {
        let value = Value::from(json!({"zeta": 1, "alpha": 2}));
        let keys: Vec<&str> = value.as_map().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
        let back = value.to_json_with(&mut |_| JsonValue::Null);
        assert_eq!(serde_json::to_string(&back).unwrap(), r#"{"zeta":1,"alpha":2}"#);
    }

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!Value::from(json!([])).truthy());
        assert!(!Value::from("").truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::from(json!({"a": 0})).truthy());
        assert!(!Value::Unbound.truthy());
    }

    #[test]
    fn numbers_compare_loosely() {
        assert!(Value::Int(5).loose_eq(&Value::Float(5.0)));
        assert!(!Value::Int(5).loose_eq(&Value::from("5")));
        assert_eq!(Value::Int(2).loose_cmp(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Int(2).loose_cmp(&Value::from("x")), None);
    }
}
