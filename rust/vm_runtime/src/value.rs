//! Dynamic values reconstructed from port data.
//!
//! Values form a tree: scalars at the leaves, arrays and records as containers.
//! Records keep field insertion order so a value mirrors the declaration order of
//! the record signature it was unpacked from.  Narrow integers are widened on the
//! way in: every unsigned width up to 32 bits becomes [`ScalarValue::U32`] and
//! every signed one [`ScalarValue::I32`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ScalarValue {
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Scalar(ScalarValue),
    Array(Vec<Value>),
    Record(IndexMap<String, Value>),
}

impl Value {
    /// Helpful string describing the variant for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(ScalarValue::U32(_)) => "u32",
            Value::Scalar(ScalarValue::I32(_)) => "i32",
            Value::Scalar(ScalarValue::U64(_)) => "u64",
            Value::Scalar(ScalarValue::I64(_)) => "i64",
            Value::Scalar(ScalarValue::Bool(_)) => "bool",
            Value::Scalar(ScalarValue::Str(_)) => "str",
            Value::Scalar(ScalarValue::Bytes(_)) => "bytes",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    pub fn empty_record() -> Self {
        Value::Record(IndexMap::new())
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Scalar(ScalarValue::U32(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Scalar(ScalarValue::I32(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Scalar(ScalarValue::U64(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(ScalarValue::I64(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Scalar(ScalarValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(ScalarValue::Str(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Scalar(ScalarValue::Bytes(value)) => Some(value.as_slice()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field lookup on records.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(key))
    }

    /// Element count of arrays and records, character count of strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(items.len()),
            Value::Record(fields) => Some(fields.len()),
            Value::Scalar(ScalarValue::Str(value)) => Some(value.chars().count()),
            Value::Scalar(ScalarValue::Bytes(value)) => Some(value.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }
}

impl From<ScalarValue> for Value {
    fn from(value: ScalarValue) -> Self {
        Value::Scalar(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Scalar(ScalarValue::U32(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Scalar(ScalarValue::I32(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Scalar(ScalarValue::Bool(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(ScalarValue::Str(value.to_string()))
    }
}
