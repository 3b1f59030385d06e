//! Document model shared by the codec, catalog and evaluator.
use serde_json::{Map, Number, Value};

/// A schemaless document: string keys mapped to arbitrarily nested JSON values.
pub type Document = Map<String, Value>;

/// Separates the segments of a field path (`address.city`).
pub const PATH_SEPARATOR: char = '.';

/// Largest integer a double holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Run-time shape of a document value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Null,
    Boolean,
    Number,
    String,
    List,
    Object,
}

impl ValueShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueShape::Null,
            Value::Bool(_) => ValueShape::Boolean,
            Value::Number(_) => ValueShape::Number,
            Value::String(_) => ValueShape::String,
            Value::Array(_) => ValueShape::List,
            Value::Object(_) => ValueShape::Object,
        }
    }
}

/// Only top-level keys without a path separator are persisted as columns.
pub fn is_writable_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(PATH_SEPARATOR)
}

/// Builds a JSON number from a double, preferring the integer form when exact.
pub fn number_value(value: f64) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < MAX_SAFE_INTEGER {
        return Some(Value::from(value as i64));
    }
    Number::from_f64(value).map(Value::Number)
}

/// Parses a JSON object literal into a document.
pub fn from_value(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
