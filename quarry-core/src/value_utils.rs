//! Value utility functions shared across modules
//!
//! Dot-notation path access over document maps and a canonical string form
//! used for fingerprinting filters.

use crate::value::{Map, Value};

/// Get a nested value from a document map with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested documents: "address.city"
/// - Array indexing: "items.0.name"
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use quarry_core::value::Value;
/// use quarry_core::value_utils::get_path;
///
/// let doc = Value::from(json!({"address": {"city": "NYC"}}));
/// let map = doc.as_document().unwrap();
/// assert_eq!(get_path(map, "address.city"), Some(&Value::from("NYC")));
/// ```
pub fn get_path<'a>(map: &'a Map, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    match path.split_once('.') {
        None => map.get(path),
        Some((head, rest)) => get_value_path(map.get(head)?, rest),
    }
}

/// Same as [`get_path`] but starting from any value
pub fn get_value_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Document(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a value at a nested path, creating intermediate documents
///
/// A non-navigable intermediate value (number, string, ...) is replaced by
/// a document. Array segments must be in-bounds indexes; otherwise the
/// array is left untouched and `false` is returned.
pub fn set_path(map: &mut Map, path: &str, value: Value) -> bool {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
            true
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Document(Map::new()));
            set_value_path(slot, rest, value)
        }
    }
}

fn set_value_path(current: &mut Value, path: &str, value: Value) -> bool {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    if let Value::Array(items) = current {
        let slot = match head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => slot,
            None => return false,
        };
        return match rest {
            None => {
                *slot = value;
                true
            }
            Some(rest) => set_value_path(slot, rest, value),
        };
    }

    if !matches!(current, Value::Document(_)) {
        *current = Value::Document(Map::new());
    }
    let map = match current {
        Value::Document(map) => map,
        _ => return false,
    };

    match rest {
        None => {
            map.insert(head.to_string(), value);
            true
        }
        Some(rest) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Document(Map::new()));
            set_value_path(slot, rest, value)
        }
    }
}

/// Remove the value at a nested path, preserving the order of the remaining fields
pub fn remove_path(map: &mut Map, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => map.shift_remove(path),
        Some((head, rest)) => remove_value_path(map.get_mut(head)?, rest),
    }
}

fn remove_value_path(current: &mut Value, path: &str) -> Option<Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    match (current, rest) {
        (Value::Document(map), None) => map.shift_remove(head),
        (Value::Document(map), Some(rest)) => remove_value_path(map.get_mut(head)?, rest),
        (Value::Array(items), None) => {
            let index = head.parse::<usize>().ok()?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }
        (Value::Array(items), Some(rest)) => {
            let index = head.parse::<usize>().ok()?;
            remove_value_path(items.get_mut(index)?, rest)
        }
        _ => None,
    }
}

/// Canonical string of a value where document keys are sorted.
///
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same string; used to
/// fingerprint filters for the plan cache. Scalars keep their kind and
/// numbers their exact bits, so `null`, NaN and the infinities never
/// collide.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::Document(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            let inner = pairs
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonical_string(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", inner)
        }
        Value::Array(items) => {
            let inner = items
                .iter()
                .map(canonical_string)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format!("#{:016x}", n.to_bits()),
        Value::String(s) => format!("{:?}", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: serde_json::Value) -> Map {
        match Value::from(v) {
            Value::Document(map) => map,
            _ => panic!("expected a document"),
        }
    }

    #[test]
    fn test_get_path_nested_and_array() {
        let doc = map(json!({
            "address": {"city": "NYC", "zip": 10001},
            "items": [{"name": "item1"}, {"name": "item2"}]
        }));
        assert_eq!(get_path(&doc, "address.city"), Some(&Value::from("NYC")));
        assert_eq!(get_path(&doc, "items.1.name"), Some(&Value::from("item2")));
        assert_eq!(get_path(&doc, "items.5.name"), None);
        assert_eq!(get_path(&doc, "address.missing"), None);
        assert_eq!(get_path(&doc, ""), None);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut doc = map(json!({"name": "Alice"}));
        assert!(set_path(&mut doc, "a.b.c", Value::from(42)));
        assert_eq!(get_path(&doc, "a.b.c"), Some(&Value::from(42)));
    }

    #[test]
    fn test_set_path_replaces_scalar_intermediate() {
        let mut doc = map(json!({"a": 5}));
        assert!(set_path(&mut doc, "a.b", Value::from(1)));
        assert_eq!(Value::Document(doc), Value::from(json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_set_path_out_of_bounds_array() {
        let mut doc = map(json!({"items": [1, 2]}));
        assert!(!set_path(&mut doc, "items.5", Value::from(9)));
        assert!(set_path(&mut doc, "items.1", Value::from(9)));
        assert_eq!(get_path(&doc, "items.1"), Some(&Value::from(9)));
    }

    #[test]
    fn test_remove_path_keeps_order() {
        let mut doc = map(json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));
        assert_eq!(remove_path(&mut doc, "a"), Some(Value::from(1)));
        assert_eq!(remove_path(&mut doc, "b.x"), Some(Value::from(1)));
        assert_eq!(remove_path(&mut doc, "b.missing"), None);
        let keys: Vec<_> = doc.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_canonical_string_key_order() {
        let v1 = Value::from(json!({"z": [{"b": 2, "a": 1}], "a": {"y": 1, "x": 2}}));
        let v2 = Value::from(json!({"a": {"x": 2, "y": 1}, "z": [{"a": 1, "b": 2}]}));
        assert_eq!(canonical_string(&v1), canonical_string(&v2));
    }

    #[test]
    fn test_canonical_string_keeps_non_finite_numbers_apart() {
        let forms: Vec<String> = [
            Value::Null,
            Value::Number(f64::NAN),
            Value::Number(f64::INFINITY),
            Value::Number(f64::NEG_INFINITY),
            Value::from("null"),
            Value::from(1),
            Value::from("1"),
        ]
        .iter()
        .map(canonical_string)
        .collect();
        for (i, a) in forms.iter().enumerate() {
            for b in &forms[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
