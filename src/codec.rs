//! Document/row codec.
//!
//! Flattening ("hybridizing") turns a document into the column values of one row:
//! scalars map onto scalar columns and nested lists or objects are serialized into JSON
//! columns. Unflattening reverses this, using the engine-reported column types to
//! decide how each stored value is read back:
//!
//! | Column      | Stored as            | Read back as          |
//! |-------------|----------------------|-----------------------|
//! | `TINYINT`   | `0` / `1`            | `false` / `true`      |
//! | numeric     | integer or double    | number                |
//! | text        | text                 | string                |
//! | `JSON`      | serialized JSON text | parsed list or object |
//!
//! Keys containing the path separator are never flattened; only top-level fields are
//! persisted as columns.
//!
//! Top-level numbers round-trip by value rather than by representation: an integral
//! double such as `1.0` is read back as the integer `1`. Numbers inside JSON columns
//! keep their serialized form.
use log::trace;
use serde_json::Value;
use thiserror::Error;

use crate::{
    catalog::types::{ShortType, short_type_for},
    document::{Document, is_writable_key, number_value},
    engine::{ColumnMeta, ResultSet, SqlValue},
};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("column '{column}' holds invalid JSON: {reason}")]
    InvalidJson { column: String, reason: String },

    #[error("column '{column}' holds a non-finite number")]
    NonFinite { column: String },

    #[error("row has {values} values for {columns} columns")]
    Shape { columns: usize, values: usize },
}

/// Flattened document: column name and storable value, in document key order.
pub type HybridRow = Vec<(String, SqlValue)>;

pub fn flatten(document: &Document) -> HybridRow {
    document
        .iter()
        .filter(|(key, _)| is_writable_key(key))
        .map(|(key, value)| (key.clone(), flatten_value(value)))
        .collect()
}

pub fn flatten_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Int(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => n.as_f64().map(SqlValue::Double).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Json(value.to_string()),
    }
}

pub fn unflatten(columns: &[ColumnMeta], values: Vec<SqlValue>) -> Result<Document, CodecError> {
    if columns.len() != values.len() {
        return Err(CodecError::Shape {
            columns: columns.len(),
            values: values.len(),
        });
    }

    let mut document = Document::new();
    for (column, value) in columns.iter().zip(values) {
        document.insert(column.name.clone(), unflatten_value(column, value)?);
    }
    Ok(document)
}

pub fn unflatten_value(column: &ColumnMeta, value: SqlValue) -> Result<Value, CodecError> {
    let number = |d: f64| {
        number_value(d).ok_or_else(|| CodecError::NonFinite {
            column: column.name.clone(),
        })
    };
    let parse = |s: &str| {
        serde_json::from_str::<Value>(s).map_err(|e| CodecError::InvalidJson {
            column: column.name.clone(),
            reason: e.to_string(),
        })
    };

    Ok(match (short_type_for(column.type_code), value) {
        (_, SqlValue::Null) => Value::Null,
        (ShortType::Boolean, SqlValue::Int(i)) => Value::Bool(i != 0),
        (ShortType::Boolean, SqlValue::Double(d)) => Value::Bool(d != 0.0),
        (ShortType::Boolean, SqlValue::Text(s)) => Value::Bool(s != "0" && !s.is_empty()),
        (ShortType::Json, SqlValue::Json(s) | SqlValue::Text(s)) => parse(&s)?,
        (ShortType::String, SqlValue::Text(s) | SqlValue::Json(s)) => Value::String(s),
        (ShortType::String, SqlValue::Int(i)) => Value::String(i.to_string()),
        (ShortType::String, SqlValue::Double(d)) => Value::String(d.to_string()),
        (ShortType::Number, SqlValue::Text(s)) => match s.trim().parse::<f64>() {
            Ok(d) => number(d)?,
            Err(_) => Value::String(s),
        },
        (_, SqlValue::Int(i)) => Value::from(i),
        (_, SqlValue::Double(d)) => number(d)?,
        (_, SqlValue::Json(s)) => parse(&s)?,
        (_, SqlValue::Text(s)) => Value::String(s),
    })
}

/// Decodes every row of a result set.
pub fn decode_rows(result: ResultSet) -> Result<Vec<Document>, CodecError> {
    let ResultSet { columns, rows, .. } = result;
    rows.into_iter()
        .map(|row| {
            let document = unflatten(&columns, row)?;
            trace!("decoded row {document:?}");
            Ok(document)
        })
        .collect()
}
