use std::cmp::Ordering;

use serde_json::Value;

use crate::document::Document;

use super::{
    EvalError, compare_values, invalid, is_operator_expression, segments, truthy, values_equal,
};

pub fn matches(document: &Document, criteria: &Document) -> Result<bool, EvalError> {
    for (key, condition) in criteria {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(document, key, condition)?,
            "$nor" => !any_clause(document, key, condition)?,
            op if op.starts_with('$') => return Err(EvalError::UnknownOperator(op.to_string())),
            path => condition_matches(&values_at(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, value: &'a Value) -> Result<Vec<&'a Document>, EvalError> {
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(invalid(operator, "expected a non-empty array")),
    };
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| invalid(operator, "expected an array of objects"))
        })
        .collect()
}

fn any_clause(document: &Document, operator: &str, value: &Value) -> Result<bool, EvalError> {
    for clause in clauses(operator, value)? {
        if matches(document, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Every value reachable at `path`, fanning out over arrays.
pub(crate) fn values_at<'a>(document: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments = segments(path);
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = document.get(*first) {
            lookup(value, rest, &mut out);
        }
    }
    out
}

fn lookup<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((first, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*first) {
                lookup(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Some(item) = first.parse::<usize>().ok().and_then(|i| items.get(i)) {
                lookup(item, rest, out);
            }
            for item in items.iter().filter(|i| i.is_object()) {
                lookup(item, segments, out);
            }
        }
        _ => {}
    }
}

/// Matches the values found at a path against a literal or an operator expression.
pub(crate) fn condition_matches(values: &[&Value], condition: &Value) -> Result<bool, EvalError> {
    match condition {
        Value::Object(operators) if is_operator_expression(condition) => {
            for (operator, argument) in operators {
                if !operator_matches(values, operator, argument)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(equals_any(values, condition)),
    }
}

fn equal_or_contains(value: &Value, target: &Value) -> bool {
    values_equal(value, target)
        || matches!(value, Value::Array(items) if items.iter().any(|i| values_equal(i, target)))
}

fn equals_any(values: &[&Value], target: &Value) -> bool {
    if values.is_empty() {
        return target.is_null();
    }
    values.iter().any(|v| equal_or_contains(v, target))
}

/// Candidate values plus the elements of any array candidates.
fn expand<'a>(values: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn in_list(values: &[&Value], operator: &str, argument: &Value) -> Result<bool, EvalError> {
    let list = argument
        .as_array()
        .ok_or_else(|| invalid(operator, "expected an array"))?;
    Ok(list.iter().any(|item| equals_any(values, item)))
}

fn operator_matches(values: &[&Value], operator: &str, argument: &Value) -> Result<bool, EvalError> {
    let range = |accept: fn(Ordering) -> bool| {
        expand(values)
            .into_iter()
            .any(|v| compare_values(v, argument).is_some_and(accept))
    };

    Ok(match operator {
        "$eq" => equals_any(values, argument),
        "$ne" => !equals_any(values, argument),
        "$gt" => range(Ordering::is_gt),
        "$gte" => range(Ordering::is_ge),
        "$lt" => range(Ordering::is_lt),
        "$lte" => range(Ordering::is_le),
        "$in" => in_list(values, operator, argument)?,
        "$nin" => !in_list(values, operator, argument)?,
        "$exists" => !values.is_empty() == truthy(argument),
        "$not" => {
            if !is_operator_expression(argument) {
                return Err(invalid(operator, "expected an operator expression"));
            }
            !condition_matches(values, argument)?
        }
        "$size" => {
            let size = argument
                .as_u64()
                .ok_or_else(|| invalid(operator, "expected a non-negative integer"))?;
            values
                .iter()
                .any(|v| matches!(v, Value::Array(items) if items.len() as u64 == size))
        }
        "$all" => {
            let required = argument
                .as_array()
                .ok_or_else(|| invalid(operator, "expected an array"))?;
            !required.is_empty()
                && values
                    .iter()
                    .any(|v| required.iter().all(|r| equal_or_contains(v, r)))
        }
        "$elemMatch" => {
            let query = argument
                .as_object()
                .ok_or_else(|| invalid(operator, "expected an object"))?;
            let mut found = false;
            for value in values {
                let Value::Array(items) = value else {
                    continue;
                };
                for item in items {
                    let hit = if is_operator_expression(argument) {
                        condition_matches(&[item], argument)?
                    } else {
                        match item {
                            Value::Object(element) => matches(element, query)?,
                            _ => false,
                        }
                    };
                    if hit {
                        found = true;
                        break;
                    }
                }
                if found {
                    break;
                }
            }
            found
        }
        other => return Err(EvalError::UnknownOperator(other.to_string())),
    })
}
