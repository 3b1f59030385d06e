//! Document query, update and projection languages.
//!
//! The storage layer never interprets criteria itself beyond the pushdown subset; full
//! semantics come from an [`Evaluator`]. [`BasicEvaluator`] implements a MongoDB-style
//! subset:
//!
//! - matching: implicit equality, dotted paths, `$eq $ne $gt $gte $lt $lte $in $nin
//!   $exists $not $size $all $elemMatch` and the logical `$and $or $nor`;
//! - updates: `$set $unset $inc $mul $min $max $rename $push $addToSet $pull $pop`;
//! - projections: inclusion or exclusion by path.
mod matcher;
mod projection;
mod update;

use std::cmp::Ordering;

use serde_json::Value;
use thiserror::Error;

use crate::document::{Document, PATH_SEPARATOR};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid argument for '{operator}': {reason}")]
    InvalidArgument {
        operator: String,
        reason: &'static str,
    },

    #[error("update document contains no update operators")]
    NoUpdateOperators,

    #[error("cannot apply '{operator}' at '{path}': {reason}")]
    PathConflict {
        operator: String,
        path: String,
        reason: &'static str,
    },

    #[error("projection cannot mix inclusion and exclusion")]
    MixedProjection,
}

pub(crate) fn invalid(operator: &str, reason: &'static str) -> EvalError {
    EvalError::InvalidArgument {
        operator: operator.to_string(),
        reason,
    }
}

/// Document query language capability consumed by the storage layer.
pub trait Evaluator {
    fn matches(&self, document: &Document, criteria: &Document) -> Result<bool, EvalError>;

    /// Returns a copy of `document` with `update` applied.
    fn apply(&self, document: &Document, update: &Document) -> Result<Document, EvalError>;

    fn project(&self, document: &Document, projection: &Document) -> Result<Document, EvalError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEvaluator;

impl Evaluator for BasicEvaluator {
    fn matches(&self, document: &Document, criteria: &Document) -> Result<bool, EvalError> {
        matcher::matches(document, criteria)
    }

    fn apply(&self, document: &Document, update: &Document) -> Result<Document, EvalError> {
        update::apply(document, update)
    }

    fn project(&self, document: &Document, projection: &Document) -> Result<Document, EvalError> {
        projection::project(document, projection)
    }
}

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).collect()
}

/// Whether a condition is an operator expression (`{"$gt": 1}`) rather than a literal.
pub(crate) fn is_operator_expression(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Structural equality with numbers compared by value.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Ordering between values of the same kind; `None` across kinds.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}
