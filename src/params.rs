//! Nested-map flattening for the parameter store
//!
//! Parameters are persisted as a flat map from dotted keys to JSON values.
//! Nested objects supplied by the caller descend with a dot-joined prefix;
//! arrays and scalars terminate descent and become leaves.

use serde_json::{Map, Value};

/// Flat dotted-key parameter map
pub type FlatMap = Map<String, Value>;

/// Flatten a nested JSON object into dotted keys.
///
/// `{"a": {"b": {"c": 1}}, "layers": [256, 128]}` becomes
/// `{"a.b.c": 1, "layers": [256, 128]}`. Arrays are leaves and are never
/// descended into.
#[must_use]
pub fn flatten(nested: &Map<String, Value>) -> FlatMap {
    let mut flat = Map::new();
    for (key, value) in nested {
        flatten_into(&mut flat, key, value);
    }
    flat
}

fn flatten_into(flat: &mut FlatMap, prefix: &str, value: &Value) {
    match value {
        Value::Object(nested) => {
            for (key, inner) in nested {
                flatten_into(flat, &format!("{prefix}.{key}"), inner);
            }
        }
        other => {
            flat.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Reconstruct a nested object from a flat dotted-key map.
///
/// Inverse of [`flatten`] for maps whose leaf keys do not collide with
/// intermediate paths. On a collision (`"a"` and `"a.b"` both present) the
/// deeper path wins.
#[must_use]
pub fn unflatten(flat: &FlatMap) -> Map<String, Value> {
    let mut nested = Map::new();
    for (dotted, value) in flat {
        let mut segments = dotted.split('.').peekable();
        let mut cursor = &mut nested;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                cursor.insert(segment.to_string(), value.clone());
            } else {
                let entry = cursor
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                let Value::Object(inner) = entry else {
                    unreachable!()
                };
                cursor = inner;
            }
        }
    }
    nested
}

/// Merge incoming flat entries into `current` (upsert, no delete)
pub fn merge_into(current: &mut FlatMap, updates: FlatMap) {
    for (key, value) in updates {
        current.insert(key, value);
    }
}
