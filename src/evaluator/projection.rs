use serde_json::{Map, Value};

use crate::document::Document;

use super::{EvalError, invalid, segments};

fn included(path: &str, flag: &Value) -> Result<bool, EvalError> {
    match flag {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        _ => Err(invalid(path, "projection values must be booleans or numbers")),
    }
}

pub fn project(document: &Document, projection: &Document) -> Result<Document, EvalError> {
    if projection.is_empty() {
        return Ok(document.clone());
    }

    let mut inclusion = None;
    for (path, flag) in projection {
        let include = included(path, flag)?;
        match inclusion {
            None => inclusion = Some(include),
            Some(mode) if mode != include => return Err(EvalError::MixedProjection),
            Some(_) => {}
        }
    }

    if inclusion == Some(true) {
        let mut out = Document::new();
        for path in projection.keys() {
            copy_path(document, &mut out, &segments(path));
        }
        Ok(out)
    } else {
        let mut out = document.clone();
        for path in projection.keys() {
            remove_path(&mut out, &segments(path));
        }
        Ok(out)
    }
}

fn copy_path(source: &Map<String, Value>, target: &mut Map<String, Value>, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = source.get(*first) else {
        return;
    };
    if rest.is_empty() {
        target.insert(first.to_string(), value.clone());
        return;
    }

    match value {
        Value::Object(inner) => {
            let entry = target
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(out) = entry {
                copy_path(inner, out, rest);
            }
        }
        Value::Array(items) => {
            let elements: Vec<&Map<String, Value>> =
                items.iter().filter_map(Value::as_object).collect();
            let entry = target.entry(first.to_string()).or_insert_with(|| {
                Value::Array(elements.iter().map(|_| Value::Object(Map::new())).collect())
            });
            if let Value::Array(out) = entry {
                for (element, projected) in elements.iter().zip(out.iter_mut()) {
                    if let Value::Object(projected) = projected {
                        copy_path(element, projected, rest);
                    }
                }
            }
        }
        _ => {}
    }
}

fn remove_path(target: &mut Map<String, Value>, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        target.remove(*first);
        return;
    }

    match target.get_mut(*first) {
        Some(Value::Object(inner)) => remove_path(inner, rest),
        Some(Value::Array(items)) => {
            for item in items {
                if let Value::Object(inner) = item {
                    remove_path(inner, rest);
                }
            }
        }
        _ => {}
    }
}
