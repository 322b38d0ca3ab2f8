//! JSON-pointer patch application for the in-memory store.

use serde_json::Value;

use super::types::{CosmosError, CosmosResult, Document, PatchOperation};

/// Apply patch operations in order. On error the document may be partially
/// patched; callers patch a copy.
pub(crate) fn apply_patch(document: &mut Document, operations: &[PatchOperation]) -> CosmosResult<()> {
    let mut root = Value::Object(std::mem::take(document));
    let result = operations.iter().try_for_each(|op| apply_one(&mut root, op));
    if let Value::Object(map) = root {
        *document = map;
    }
    result
}

fn apply_one(root: &mut Value, op: &PatchOperation) -> CosmosResult<()> {
    let path = op.path();
    if !path.starts_with('/') || path.len() < 2 {
        return Err(CosmosError::bad_request(format!(
            "Invalid patch path '{}'",
            path
        )));
    }
    if path == "/id" {
        return Err(CosmosError::bad_request("The id of an item cannot be patched"));
    }

    let split = path.rfind('/').unwrap_or(0);
    let parent_pointer = &path[..split];
    let last = unescape(&path[split + 1..]);

    let parent = root
        .pointer_mut(parent_pointer)
        .ok_or_else(|| path_not_found(path))?;

    match parent {
        Value::Object(map) => match op {
            PatchOperation::Add { value, .. } | PatchOperation::Set { value, .. } => {
                map.insert(last, value.clone());
            }
            PatchOperation::Replace { value, .. } => {
                let slot = map.get_mut(&last).ok_or_else(|| path_not_found(path))?;
                *slot = value.clone();
            }
            PatchOperation::Remove { .. } => {
                map.remove(&last).ok_or_else(|| path_not_found(path))?;
            }
            PatchOperation::Increment { value, .. } => {
                let next = increment(map.get(&last), value, path)?;
                map.insert(last, next);
            }
        },
        Value::Array(items) => {
            let index = if last == "-" {
                items.len()
            } else {
                last.parse::<usize>().map_err(|_| path_not_found(path))?
            };
            match op {
                PatchOperation::Add { value, .. } => {
                    if index > items.len() {
                        return Err(path_not_found(path));
                    }
                    items.insert(index, value.clone());
                }
                PatchOperation::Set { value, .. } | PatchOperation::Replace { value, .. } => {
                    let slot = items.get_mut(index).ok_or_else(|| path_not_found(path))?;
                    *slot = value.clone();
                }
                PatchOperation::Remove { .. } => {
                    if index >= items.len() {
                        return Err(path_not_found(path));
                    }
                    items.remove(index);
                }
                PatchOperation::Increment { value, .. } => {
                    let slot = items.get_mut(index).ok_or_else(|| path_not_found(path))?;
                    *slot = increment(Some(slot), value, path)?;
                }
            }
        }
        _ => return Err(path_not_found(path)),
    }
    Ok(())
}

fn increment(current: Option<&Value>, by: &Value, path: &str) -> CosmosResult<Value> {
    let Some(current) = current else {
        return Ok(by.clone());
    };
    match (current, by) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                if let Some(sum) = a.checked_add(b) {
                    return Ok(Value::from(sum));
                }
            }
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            serde_json::Number::from_f64(sum)
                .map(Value::Number)
                .ok_or_else(|| CosmosError::bad_request(format!("Increment overflow at '{}'", path)))
        }
        _ => Err(CosmosError::bad_request(format!(
            "Increment requires numeric values at '{}'",
            path
        ))),
    }
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn path_not_found(path: &str) -> CosmosError {
    CosmosError::bad_request(format!("Patch path '{}' does not exist", path))
}
