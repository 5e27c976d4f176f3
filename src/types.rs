//! Generic in-memory values produced by decoding and consumed by encoding.

use std::collections::HashMap;

/// A decoded datum.
///
/// Records keep their fields in schema order.  Unions carry the index of the
/// selected branch so a value can be re-encoded without guessing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Fixed(Vec<u8>),
    /// Symbol index and symbol name.
    Enum(u32, String),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Branch index and branch value.
    Union(u32, Box<Value>),
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Short name of the value's shape, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null       => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_)     => "int",
            Value::Long(_)    => "long",
            Value::Float(_)   => "float",
            Value::Double(_)  => "double",
            Value::Bytes(_)   => "bytes",
            Value::String(_)  => "string",
            Value::Fixed(_)   => "fixed",
            Value::Enum(..)   => "enum",
            Value::Array(_)   => "array",
            Value::Map(_)     => "map",
            Value::Union(..)  => "union",
            Value::Record(_)  => "record",
        }
    }

    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Build a record from `(name, value)` pairs.
    pub fn record<I, S>(fields: I) -> Value
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Record(fields.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }

    /// Wrap `value` as branch `index` of a union.
    pub fn union(index: u32, value: Value) -> Value {
        Value::Union(index, Box::new(value))
    }

    /// Strip any union wrapper.
    pub fn unwrap_union(&self) -> &Value {
        match self {
            Value::Union(_, inner) => inner.unwrap_union(),
            other => other,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Boolean(v) }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Long(v) }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::Float(v) }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Double(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_owned()) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}
