//! Scene (editor layout) documents and the delta-merge algorithm.
//!
//! A scene document is an opaque JSON object. The merge only looks at a few
//! top-level fields:
//!
//! - `elements`: map of element path to element document
//! - `copies`: list of elements that were created as copies, either as
//!   `{"path": ...}` objects or bare path strings
//! - `hidden`, `locked`, `custom_names`: sets replaced wholesale
//! - `is_delta`: marks an update as a partial document
//!
//! Everything else in a delta is copied over at the top level.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Config name used when a client does not name one.
pub const MASTER_CONFIG: &str = "master";

pub const ELEMENTS: &str = "elements";
pub const COPIES: &str = "copies";
pub const HIDDEN: &str = "hidden";
pub const LOCKED: &str = "locked";
pub const CUSTOM_NAMES: &str = "custom_names";
pub const IS_DELTA: &str = "is_delta";

/// Per-element marker for elements that were created as copies.
pub const IS_COPY: &str = "is_copy";

const WHOLESALE_FIELDS: &[&str] = &[HIDDEN, LOCKED, COPIES, CUSTOM_NAMES];

/// Whether an update is flagged as a delta.
pub fn is_delta(update: &Value) -> bool {
    update.get(IS_DELTA).and_then(Value::as_bool).unwrap_or(false)
}

/// Apply an update to the stored document.
///
/// Non-delta updates replace the document outright.
pub fn apply_update(existing: Option<&Value>, update: &Value) -> Value {
    let mut result = if is_delta(update) {
        merge_delta(existing, update)
    } else {
        update.clone()
    };
    if let Value::Object(map) = &mut result {
        map.remove(IS_DELTA);
    }
    result
}

/// Merge a delta over an existing document.
pub fn merge_delta(existing: Option<&Value>, delta: &Value) -> Value {
    let mut doc = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let Some(delta) = delta.as_object() else {
        return Value::Object(doc);
    };

    let mut elements = match doc.remove(ELEMENTS) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    // Copies that are gone from the client's current copy list were deleted.
    if let Some(current) = delta.get(COPIES) {
        let previous = copy_paths(doc.get(COPIES));
        let current = copy_paths(Some(current));
        elements.retain(|key, element| {
            let was_copy = previous.contains(key.as_str())
                || element.get(IS_COPY).and_then(Value::as_bool).unwrap_or(false);
            !was_copy || current.contains(key.as_str())
        });
    }

    if let Some(Value::Object(updates)) = delta.get(ELEMENTS) {
        for (key, value) in updates {
            match elements.get_mut(key) {
                Some(slot) => deep_merge(slot, value),
                None => {
                    elements.insert(key.clone(), value.clone());
                }
            }
        }
    }
    doc.insert(ELEMENTS.to_string(), Value::Object(elements));

    for field in WHOLESALE_FIELDS {
        if let Some(value) = delta.get(*field) {
            doc.insert((*field).to_string(), value.clone());
        }
    }

    for (key, value) in delta {
        if key == IS_DELTA || key == ELEMENTS || WHOLESALE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        doc.insert(key.clone(), value.clone());
    }

    Value::Object(doc)
}

/// Recursively merge `patch` into `target`; the patch wins on any non-object collision.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn copy_paths(copies: Option<&Value>) -> HashSet<String> {
    let Some(Value::Array(items)) = copies else {
        return HashSet::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(path) => Some(path.clone()),
            Value::Object(map) => map.get("path").and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
        .collect()
}
