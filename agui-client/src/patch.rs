//! RFC 6902 application over dynamic JSON values.
//!
//! The reducer applies patches to the run state (STATE_DELTA) and to activity
//! message content (ACTIVITY_DELTA). Application is atomic: the input value is
//! never observed half-patched; on failure the caller keeps the original.

use serde_json::Value;
use thiserror::Error;

use agui_event::JsonPatchOp;

/// Patch application failure. Recovered locally by the reducer.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid JSON pointer: {0}")]
    InvalidPointer(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("array index out of bounds: {0}")]
    IndexOutOfBounds(String),
    #[error("test failed at {0}")]
    TestFailed(String),
}

/// Applies all operations in order to a copy of `target`.
///
/// Returns the patched value, or an error leaving `target` untouched.
pub fn apply_patch(target: &Value, ops: &[JsonPatchOp]) -> Result<Value, PatchError> {
    let mut doc = target.clone();
    for op in ops {
        apply_op(&mut doc, op)?;
    }
    Ok(doc)
}

fn apply_op(doc: &mut Value, op: &JsonPatchOp) -> Result<(), PatchError> {
    match op {
        JsonPatchOp::Add { path, value } => add(doc, path, value.clone()),
        JsonPatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        JsonPatchOp::Replace { path, value } => {
            let slot = resolve_mut(doc, path)?;
            *slot = value.clone();
            Ok(())
        }
        JsonPatchOp::Move { from, path } => {
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        JsonPatchOp::Copy { from, path } => {
            let value = resolve_mut(doc, from)?.clone();
            add(doc, path, value)
        }
        JsonPatchOp::Test { path, value } => {
            let actual = resolve_mut(doc, path)?;
            if actual == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed(path.clone()))
            }
        }
    }
}

/// Splits a JSON pointer into unescaped reference tokens.
fn tokens(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn resolve_mut<'a>(doc: &'a mut Value, pointer: &str) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for token in tokens(pointer)? {
        current = match current {
            Value::Object(map) => map
                .get_mut(&token)
                .ok_or_else(|| PatchError::PathNotFound(pointer.to_string()))?,
            Value::Array(items) => {
                let idx = array_index(&token, items.len(), pointer)?;
                items
                    .get_mut(idx)
                    .ok_or_else(|| PatchError::IndexOutOfBounds(pointer.to_string()))?
            }
            _ => return Err(PatchError::PathNotFound(pointer.to_string())),
        };
    }
    Ok(current)
}

fn array_index(token: &str, len: usize, pointer: &str) -> Result<usize, PatchError> {
    // "-" is only valid as an insertion target, handled by `add`.
    if token == "-" || (token.len() > 1 && token.starts_with('0')) {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    }
    let idx: usize = token
        .parse()
        .map_err(|_| PatchError::InvalidPointer(pointer.to_string()))?;
    if idx >= len {
        return Err(PatchError::IndexOutOfBounds(pointer.to_string()));
    }
    Ok(idx)
}

fn add(doc: &mut Value, pointer: &str, value: Value) -> Result<(), PatchError> {
    let toks = tokens(pointer)?;
    let Some((last, parent_toks)) = toks.split_last() else {
        *doc = value;
        return Ok(());
    };
    let mut current = &mut *doc;
    for token in parent_toks {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::PathNotFound(pointer.to_string()))?,
            Value::Array(items) => {
                let idx = array_index(token, items.len(), pointer)?;
                &mut items[idx]
            }
            _ => return Err(PatchError::PathNotFound(pointer.to_string())),
        };
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            if last.len() > 1 && last.starts_with('0') {
                return Err(PatchError::InvalidPointer(pointer.to_string()));
            }
            let idx: usize = last
                .parse()
                .map_err(|_| PatchError::InvalidPointer(pointer.to_string()))?;
            if idx > items.len() {
                return Err(PatchError::IndexOutOfBounds(pointer.to_string()));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(pointer.to_string())),
    }
}

fn remove(doc: &mut Value, pointer: &str) -> Result<Value, PatchError> {
    let toks = tokens(pointer)?;
    let Some((last, parent_toks)) = toks.split_last() else {
        return Ok(std::mem::take(doc));
    };
    let mut current = &mut *doc;
    for token in parent_toks {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::PathNotFound(pointer.to_string()))?,
            Value::Array(items) => {
                let idx = array_index(token, items.len(), pointer)?;
                &mut items[idx]
            }
            _ => return Err(PatchError::PathNotFound(pointer.to_string())),
        };
    }
    match current {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| PatchError::PathNotFound(pointer.to_string())),
        Value::Array(items) => {
            let idx = array_index(last, items.len(), pointer)?;
            Ok(items.remove(idx))
        }
        _ => Err(PatchError::PathNotFound(pointer.to_string())),
    }
}
