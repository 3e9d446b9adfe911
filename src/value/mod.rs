//! # Value Type System
//!
//! Dynamically-typed values flowing through compilation and materialization:
//! constants in the operator tree, captured runtime values bound as
//! parameters, column values read back from rows and the objects the
//! materializer rebuilds from them.
//!
//! ## Design Decisions
//!
//! - **Column types**: `ValueType` mirrors the column types a descriptor can
//!   declare; nullability is tracked next to it, never inside it
//! - **Structured values**: `List` and `Object` carry materialized nested
//!   collections and member-initialized objects (members keep declaration order)
//! - **JSON bridge**: values convert to and from `serde_json::Value` so that
//!   structured-array columns can be decoded and callers can deserialize
//!   results into their own types
//!
//! ## Usage
//!
//! ```rust
//! use sqlweave::value::{Value, ValueType};
//!
//! let v = Value::from("hello");
//! assert_eq!(v.value_type(), Some(ValueType::String));
//! assert_eq!(Value::from(7).coerce(ValueType::Int64), Value::Int64(7));
//! ```

use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Timestamp layout used when date/time values travel as text
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Column and parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    DateTime,
    /// Serialized structured data (JSON text)
    Json,
}

impl ValueType {
    /// Integral types (averages over these are computed in floating point)
    pub fn is_integral(&self) -> bool {
        matches!(self, ValueType::Int32 | ValueType::Int64)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int32 | ValueType::Int64 | ValueType::Float64)
    }

    /// Result type of an arithmetic operator over two operand types
    pub fn widen(self, other: ValueType) -> ValueType {
        match (self, other) {
            (ValueType::Float64, _) | (_, ValueType::Float64) => ValueType::Float64,
            (ValueType::Int64, _) | (_, ValueType::Int64) => ValueType::Int64,
            (ValueType::String, _) | (_, ValueType::String) => ValueType::String,
            (a, _) => a,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Float64 => "float64",
            ValueType::String => "string",
            ValueType::DateTime => "datetime",
            ValueType::Json => "json",
        };
        write!(f, "{name}")
    }
}

/// A dynamically-typed value
#[derive(Debug, Clone)]
pub enum Value {
    /// Null/missing value
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    /// UTF-8 string (reference counted for cheap cloning)
    String(Arc<str>),
    DateTime(NaiveDateTime),
    /// Materialized sequence
    List(Vec<Value>),
    /// Member-initialized object, members in declaration order
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Scalar type of this value, `None` for null and structured values
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int32(_) => Some(ValueType::Int32),
            Value::Int64(_) => Some(ValueType::Int64),
            Value::Float64(_) => Some(ValueType::Float64),
            Value::String(_) => Some(ValueType::String),
            Value::DateTime(_) => Some(ValueType::DateTime),
            Value::Null | Value::List(_) | Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int32(v) => Some(*v != 0),
            Value::Int64(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Float64(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a member of an object value
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    /// Convert a value read from a row to the declared column type.
    ///
    /// Drivers commonly widen integers or hand BIT columns back as numbers;
    /// values that cannot be converted are returned unchanged.
    pub fn coerce(self, ty: ValueType) -> Value {
        match (ty, self) {
            (_, Value::Null) => Value::Null,
            (ValueType::Bool, v) => match v.as_bool() {
                Some(b) => Value::Bool(b),
                None => v,
            },
            (ValueType::Int32, Value::Int64(v)) => match i32::try_from(v) {
                Ok(n) => Value::Int32(n),
                Err(_) => Value::Int64(v),
            },
            (ValueType::Int32, Value::Float64(v)) if v.fract() == 0.0 => Value::Int32(v as i32),
            (ValueType::Int64, Value::Int32(v)) => Value::Int64(i64::from(v)),
            (ValueType::Int64, Value::Float64(v)) if v.fract() == 0.0 => Value::Int64(v as i64),
            (ValueType::Float64, Value::Int32(v)) => Value::Float64(f64::from(v)),
            (ValueType::Float64, Value::Int64(v)) => Value::Float64(v as f64),
            (ValueType::DateTime, Value::String(s)) => {
                match NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT) {
                    Ok(dt) => Value::DateTime(dt),
                    Err(_) => Value::String(s),
                }
            }
            (_, v) => v,
        }
    }

    /// Decode a JSON value into the declared type
    pub fn from_json(json: &serde_json::Value, ty: ValueType) -> Value {
        let raw = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Value::Int64(i),
                (None, Some(f)) => Value::Float64(f),
                (None, None) => Value::Null,
            },
            serde_json::Value::String(s) => Value::string(s),
            other => Value::string(&other.to_string()),
        };
        raw.coerce(ty)
    }

    /// Convert to JSON (objects keep member order)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int32(v) => serde_json::Value::from(*v),
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::DateTime(dt) => serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(members) => serde_json::Value::Object(
                members.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Deserialize into a caller-defined type
    pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_json())
    }

    /// Equality with null equal to null and numbers compared across widths
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (a, b) if a.value_type().is_some_and(|t| t.is_numeric())
                && b.value_type().is_some_and(|t| t.is_numeric()) =>
            {
                a.as_f64() == b.as_f64()
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Object(members) => {
                write!(f, "{{ ")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {value}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

// Implement PartialEq manually to handle f64 comparison
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::List(items) => items.hash(state),
            Value::Object(members) => members.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            // Null sorts first, like SQL Server's ascending order
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

impl Value {
    // Cross-type ordering: Null < Bool < numbers < DateTime < String < List < Object
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => 2,
            Value::DateTime(_) => 3,
            Value::String(_) => 4,
            Value::List(_) => 5,
            Value::Object(_) => 6,
        }
    }
}

// Convenience conversions

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Float64(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::DateTime(dt) => serializer.serialize_str(&dt.format(DATETIME_FORMAT).to_string()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(members) => {
                let mut map = serializer.serialize_map(Some(members.len()))?;
                for (name, value) in members {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_bit_and_widths() {
        assert_eq!(Value::Int32(1).coerce(ValueType::Bool), Value::Bool(true));
        assert_eq!(Value::Int64(9).coerce(ValueType::Int32), Value::Int32(9));
        assert_eq!(Value::Int32(9).coerce(ValueType::Float64), Value::Float64(9.0));
        assert_eq!(Value::Null.coerce(ValueType::String), Value::Null);
    }

    #[test]
    fn test_json_round_trip_keeps_member_order() {
        let value = Value::Object(vec![
            ("b".to_string(), Value::from(1)),
            ("a".to_string(), Value::List(vec![Value::from("x"), Value::Null])),
        ]);
        let json = value.to_json();
        assert_eq!(json.to_string(), r#"{"b":1,"a":["x",null]}"#);
    }

    #[test]
    fn test_from_json_uses_declared_type() {
        let json = serde_json::json!(true);
        assert_eq!(Value::from_json(&json, ValueType::Bool), Value::Bool(true));
        let json = serde_json::json!(77);
        assert_eq!(Value::from_json(&json, ValueType::Int32), Value::Int32(77));
        let json = serde_json::json!("2020-01-02T03:04:05");
        assert!(matches!(Value::from_json(&json, ValueType::DateTime), Value::DateTime(_)));
    }

    #[test]
    fn test_loose_equality_across_widths() {
        assert!(Value::Int32(3).loosely_equals(&Value::Int64(3)));
        assert!(Value::Null.loosely_equals(&Value::Null));
        assert!(!Value::Null.loosely_equals(&Value::Int32(0)));
    }

    #[test]
    fn test_ordering_puts_null_first() {
        let mut values = vec![Value::from(3), Value::Null, Value::from(1)];
        values.sort();
        assert_eq!(values, vec![Value::Null, Value::from(1), Value::from(3)]);
    }
}
