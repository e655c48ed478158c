use super::ast::Placeholder;
use super::scope::Scope;
use super::value::Value;
use crate::error::Result;
use crate::escape::Escaper;

/// Run functions and await deferred values until a terminal value remains
pub async fn settle(mut value: Value) -> Result<Value> {
    loop {
        value = match value {
            Value::Lazy(f) => f(),
            Value::Deferred(shared) => shared.await?,
            terminal => return Ok(terminal),
        };
    }
}

/// Property lookup on a settled value. Absent properties are `Null`.
fn property(value: &Value, key: &str) -> Value {
    match value {
        Value::Map(map) => map.get(key).cloned().unwrap_or_default(),
        Value::Json(json) => json_property(json, key),
        Value::Text(s) if key == "length" => Value::from(s.chars().count()),
        Value::Bytes(b) if key == "length" => Value::from(b.len()),
        _ => Value::Null,
    }
}

fn json_property(json: &serde_json::Value, key: &str) -> Value {
    match json {
        serde_json::Value::Object(map) => map.get(key).cloned().map(Value::Json).unwrap_or_default(),
        serde_json::Value::Array(items) if key == "length" => Value::from(items.len()),
        serde_json::Value::Array(items) => key
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index).cloned())
            .map(Value::Json)
            .unwrap_or_default(),
        serde_json::Value::String(s) if key == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

/// Walk a deep path (`a.b.c`), settling each step.
/// A missing step short-circuits to `Null`.
pub async fn walk_path(value: Value, path: &[String]) -> Result<Value> {
    let mut current = settle(value).await?;

    for key in path {
        if current.is_null() {
            return Ok(Value::Null);
        }
        current = settle(property(&current, key)).await?;
    }

    Ok(current)
}

/// Apply a mask chain left to right. Masks that are not registered in
/// scope are skipped.
pub fn apply_masks(scope: &Scope, masks: &[String], mut value: Value) -> Value {
    for name in masks {
        match scope.mask(name) {
            Some(mask) => value = mask(value),
            None => log::warn!("Mask '{}' is not registered, skipping it", name),
        }
    }
    value
}

/// Resolve a placeholder to the value that should be emitted
///
/// Absent values skip masks. Streams and blocks are returned untouched,
/// masks only apply to scalar and structured values.
pub async fn resolve(scope: &Scope, placeholder: &Placeholder) -> Result<Value> {
    let value = match scope.lookup(&placeholder.name) {
        Some(value) => value.clone(),
        None => {
            log::trace!("Placeholder '{}' has no value", placeholder.name);
            return Ok(Value::Null);
        }
    };

    let value = walk_path(value, &placeholder.path).await?;

    match value {
        Value::Stream(_) | Value::Block(_) => Ok(value),
        value if value.is_null() => Ok(Value::Null),
        value => Ok(apply_masks(scope, &placeholder.masks, value)),
    }
}

/// Bytes for a terminal scalar, escaped when asked to
pub fn encode(value: &Value, escape: bool, escaper: &Escaper) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(bytes) if !escape => Some(bytes.clone()),
        other => {
            let text = other.to_text()?;
            Some(if escape {
                escaper.escape(&text).into_bytes()
            } else {
                text.into_bytes()
            })
        }
    }
}
