//! Dot-path value extraction from JSON documents.

use serde_json::Value;

/// Extract the scalar addressed by a dot-separated path.
///
/// Only nested object fields are addressable. Numbers keep their literal text
/// from the response, booleans become `true`/`false`, strings are verbatim. A missing field,
/// a non-object along the path, or a non-scalar terminal all yield `None`.
pub fn extract(document: &Value, path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }

    let mut node = document;
    for segment in path.split('.') {
        node = node.as_object()?.get(segment)?;
    }

    match node {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
