//! Dot-notated path access into arbitrary event payloads.
//!
//! Event payloads are free-form JSON whose shape varies by source app, so
//! extraction policies address fields by dot-notated path
//! (`"merchant.name"`, `"attendees"`). [`get_path`] is total: a missing or
//! mismatched segment yields `None`, never an error.

use serde_json::Value;

/// Resolve a dot-notated path inside a JSON value.
///
/// Only object keys are traversed; array indexing is deliberately not
/// supported — policies address arrays as whole values and the extraction
/// sites decide how to narrow them.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Last segment of a dot-notated path (the field name used for entity-type
/// inference).
pub fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Coerce a JSON value to embeddable text.
///
/// Strings, numbers, and booleans render directly; arrays join their
/// coercible elements with `", "`; objects and null yield `None` (there is
/// no meaningful flat text for them at a text-field path).
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(as_scalar_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}

fn as_scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Narrow a JSON value to a finite f64.
pub fn as_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

/// Narrow a JSON value to an integer count.
pub fn as_count(value: &Value) -> Option<i64> {
    value.as_i64()
}

/// Remove the value at a dot-notated path, if present.
///
/// Used to prune redacted fields from a working copy of the payload before
/// any extraction runs.
pub fn remove_path(value: &mut Value, path: &str) {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.remove(segment);
            return;
        }
        match map.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_paths() {
        let payload = json!({"merchant": {"name": "Coffee Shop", "id": "m_1"}});
        assert_eq!(
            get_path(&payload, "merchant.name").and_then(as_text),
            Some("Coffee Shop".to_string())
        );
    }

    #[test]
    fn missing_path_is_none() {
        let payload = json!({"a": {"b": 1}});
        assert!(get_path(&payload, "a.c").is_none());
        assert!(get_path(&payload, "x.y.z").is_none());
        assert!(get_path(&Value::Null, "a").is_none());
    }

    #[test]
    fn coerces_scalars_and_arrays() {
        assert_eq!(as_text(&json!("hi")), Some("hi".to_string()));
        assert_eq!(as_text(&json!(42.5)), Some("42.5".to_string()));
        assert_eq!(as_text(&json!(true)), Some("true".to_string()));
        assert_eq!(
            as_text(&json!(["a", 1, {"skip": true}, "b"])),
            Some("a, 1, b".to_string())
        );
        assert_eq!(as_text(&json!({"obj": 1})), None);
        assert_eq!(as_text(&Value::Null), None);
    }

    #[test]
    fn removes_nested_path() {
        let mut payload = json!({"card": {"number": "4111", "brand": "visa"}});
        remove_path(&mut payload, "card.number");
        assert!(get_path(&payload, "card.number").is_none());
        assert!(get_path(&payload, "card.brand").is_some());
        // Removing a path that does not exist is a no-op.
        remove_path(&mut payload, "card.cvv.digit");
    }

    #[test]
    fn last_segment_of_path() {
        assert_eq!(last_segment("merchant.merchantId"), "merchantId");
        assert_eq!(last_segment("taskId"), "taskId");
    }
}
