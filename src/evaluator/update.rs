use serde_json::{Map, Value};

use crate::document::{Document, number_value};

use super::{
    EvalError, compare_values, invalid, is_operator_expression, matcher, segments, values_equal,
};

/// Location of one value inside a document, ready to be read or replaced.
enum Slot<'a> {
    Field(&'a mut Map<String, Value>, String),
    Index(&'a mut Vec<Value>, usize),
}

impl Slot<'_> {
    fn get(&self) -> Option<&Value> {
        match self {
            Slot::Field(map, key) => map.get(key.as_str()),
            Slot::Index(items, i) => items.get(*i),
        }
    }

    fn get_mut(&mut self) -> Option<&mut Value> {
        match self {
            Slot::Field(map, key) => map.get_mut(key.as_str()),
            Slot::Index(items, i) => items.get_mut(*i),
        }
    }

    fn set(&mut self, value: Value) {
        match self {
            Slot::Field(map, key) => {
                map.insert(key.clone(), value);
            }
            Slot::Index(items, i) => {
                if items.len() <= *i {
                    items.resize(*i + 1, Value::Null);
                }
                items[*i] = value;
            }
        }
    }

    /// Removes a field; array elements are nulled so positions stay stable.
    fn take(&mut self) -> Option<Value> {
        match self {
            Slot::Field(map, key) => map.remove(key.as_str()),
            Slot::Index(items, i) => items.get_mut(*i).map(Value::take),
        }
    }
}

fn conflict(operator: &str, path: &str, reason: &'static str) -> EvalError {
    EvalError::PathConflict {
        operator: operator.to_string(),
        path: path.to_string(),
        reason,
    }
}

/// Resolves `path` inside `root`. With `create`, missing intermediate objects are added.
fn locate<'a>(
    root: &'a mut Value,
    operator: &str,
    path: &str,
    create: bool,
) -> Result<Option<Slot<'a>>, EvalError> {
    let segments = segments(path);
    let Some((last, parents)) = segments.split_last() else {
        return Ok(None);
    };

    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => {
                if !create && !map.contains_key(*segment) {
                    return Ok(None);
                }
                map.entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(i) if i < items.len() => &mut items[i],
                _ if create => return Err(conflict(operator, path, "no such array element")),
                _ => return Ok(None),
            },
            _ if create => return Err(conflict(operator, path, "cannot traverse a scalar")),
            _ => return Ok(None),
        };
    }

    match current {
        Value::Object(map) => Ok(Some(Slot::Field(map, last.to_string()))),
        Value::Array(items) => match last.parse::<usize>() {
            Ok(i) => Ok(Some(Slot::Index(items, i))),
            Err(_) if create => Err(conflict(operator, path, "expected an array index")),
            Err(_) => Ok(None),
        },
        _ if create => Err(conflict(operator, path, "cannot traverse a scalar")),
        _ => Ok(None),
    }
}

fn arithmetic(
    operator: &str,
    path: &str,
    current: Option<&Value>,
    argument: &Value,
) -> Result<Value, EvalError> {
    let Value::Number(operand) = argument else {
        return Err(invalid(operator, "expected a number"));
    };
    let current = match current {
        None | Some(Value::Null) => {
            return Ok(match operator {
                "$mul" if operand.is_i64() => Value::from(0),
                "$mul" => Value::from(0.0),
                _ => argument.clone(),
            });
        }
        Some(Value::Number(n)) => n,
        Some(_) => return Err(conflict(operator, path, "target is not a number")),
    };

    let exact = match (current.as_i64(), operand.as_i64()) {
        (Some(a), Some(b)) if operator == "$inc" => a.checked_add(b),
        (Some(a), Some(b)) => a.checked_mul(b),
        _ => None,
    };
    if let Some(result) = exact {
        return Ok(Value::from(result));
    }

    let (a, b) = (
        current.as_f64().unwrap_or_default(),
        operand.as_f64().unwrap_or_default(),
    );
    let result = if operator == "$inc" { a + b } else { a * b };
    number_value(result).ok_or_else(|| conflict(operator, path, "result is not finite"))
}

fn array_mut<'a>(
    slot: &'a mut Slot<'_>,
    operator: &str,
    path: &str,
) -> Result<Option<&'a mut Vec<Value>>, EvalError> {
    match slot.get_mut() {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(conflict(operator, path, "target is not an array")),
    }
}

/// Values to append for `$push`/`$addToSet`, honoring `{"$each": [...]}`.
fn appended(operator: &str, argument: &Value) -> Result<Vec<Value>, EvalError> {
    match argument {
        Value::Object(map) if map.contains_key("$each") => match map.get("$each") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Err(invalid(operator, "$each expects an array")),
        },
        other => Ok(vec![other.clone()]),
    }
}

fn pulled(element: &Value, condition: &Value) -> Result<bool, EvalError> {
    match (element, condition) {
        (Value::Object(element), Value::Object(query)) if !is_operator_expression(condition) => {
            matcher::matches(element, query)
        }
        _ => matcher::condition_matches(&[element], condition),
    }
}

fn apply_operator(
    root: &mut Value,
    operator: &str,
    path: &str,
    argument: &Value,
) -> Result<(), EvalError> {
    match operator {
        "$set" => {
            if let Some(mut slot) = locate(root, operator, path, true)? {
                slot.set(argument.clone());
            }
        }
        "$unset" => {
            if let Some(mut slot) = locate(root, operator, path, false)? {
                slot.take();
            }
        }
        "$inc" | "$mul" => {
            if let Some(mut slot) = locate(root, operator, path, true)? {
                let value = arithmetic(operator, path, slot.get(), argument)?;
                slot.set(value);
            }
        }
        "$min" | "$max" => {
            if let Some(mut slot) = locate(root, operator, path, true)? {
                let replace = match slot.get() {
                    None | Some(Value::Null) => true,
                    Some(current) => match compare_values(argument, current) {
                        Some(order) if operator == "$min" => order.is_lt(),
                        Some(order) => order.is_gt(),
                        None => false,
                    },
                };
                if replace {
                    slot.set(argument.clone());
                }
            }
        }
        "$rename" => {
            let target = argument
                .as_str()
                .ok_or_else(|| invalid(operator, "expected a target path"))?;
            if target == path {
                return Err(conflict(operator, path, "source and target are the same"));
            }
            let value = match locate(root, operator, path, false)? {
                Some(mut slot) => slot.take(),
                None => None,
            };
            if let Some(value) = value {
                if let Some(mut slot) = locate(root, operator, target, true)? {
                    slot.set(value);
                }
            }
        }
        "$push" | "$addToSet" => {
            let values = appended(operator, argument)?;
            if let Some(mut slot) = locate(root, operator, path, true)? {
                if matches!(slot.get(), None | Some(Value::Null)) {
                    slot.set(Value::Array(Vec::new()));
                }
                if let Some(items) = array_mut(&mut slot, operator, path)? {
                    for value in values {
                        if operator == "$push" || !items.iter().any(|i| values_equal(i, &value)) {
                            items.push(value);
                        }
                    }
                }
            }
        }
        "$pull" => {
            if let Some(mut slot) = locate(root, operator, path, false)? {
                if let Some(items) = array_mut(&mut slot, operator, path)? {
                    let mut kept = Vec::with_capacity(items.len());
                    for item in items.drain(..) {
                        if !pulled(&item, argument)? {
                            kept.push(item);
                        }
                    }
                    *items = kept;
                }
            }
        }
        "$pop" => {
            let from_front = match argument.as_i64() {
                Some(1) => false,
                Some(-1) => true,
                _ => return Err(invalid(operator, "expected 1 or -1")),
            };
            if let Some(mut slot) = locate(root, operator, path, false)? {
                if let Some(items) = array_mut(&mut slot, operator, path)? {
                    if from_front && !items.is_empty() {
                        items.remove(0);
                    } else {
                        items.pop();
                    }
                }
            }
        }
        other => return Err(EvalError::UnknownOperator(other.to_string())),
    }
    Ok(())
}

pub fn apply(document: &Document, update: &Document) -> Result<Document, EvalError> {
    if update.is_empty() || update.keys().any(|k| !k.starts_with('$')) {
        return Err(EvalError::NoUpdateOperators);
    }

    let mut root = Value::Object(document.clone());
    for (operator, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| invalid(operator, "expected an object of field paths"))?;
        for (path, argument) in fields {
            apply_operator(&mut root, operator, path, argument)?;
        }
    }

    match root {
        Value::Object(map) => Ok(map),
        _ => Ok(Document::new()),
    }
}
