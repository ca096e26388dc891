//! Metadata flattening for index APIs that only accept scalar fields.

use serde_json::{Map, Value};

use crate::clients::FlatMetadata;

/// Metadata keys that may carry a document's content hash, in priority order.
const HASH_KEYS: &[&str] = &["content_hash", "sha256", "hash"];

/// Flatten nested metadata into scalar string fields.
///
/// - nested maps become dotted keys (`{"a": {"b": 1}}` → `a.b = "1"`)
/// - lists are joined with `", "`
/// - booleans become `"true"` / `"false"`, null becomes `""`
pub fn flatten_metadata(metadata: &Map<String, Value>) -> FlatMetadata {
    let mut flat = FlatMetadata::new();
    for (key, value) in metadata {
        flatten_into(&mut flat, key.clone(), value);
    }
    flat
}

fn flatten_into(flat: &mut FlatMetadata, key: String, value: &Value) {
    match value {
        Value::Object(map) => {
            for (child, value) in map {
                flatten_into(flat, format!("{}.{}", key, child), value);
            }
        }
        other => {
            flat.insert(key, scalar_to_string(other));
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        // Maps inside lists have no dotted path; keep them as JSON.
        Value::Object(_) => value.to_string(),
    }
}

/// Content hash carried in metadata, if any.
pub fn content_hash(metadata: &Map<String, Value>) -> Option<&str> {
    HASH_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .find(|hash| !hash.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_flatten_mixed_metadata() {
        let flat = flatten_metadata(&obj(json!({"a": {"b": 1}, "c": true, "d": [1, 2]})));

        assert_eq!(flat.len(), 3);
        assert_eq!(flat["a.b"], "1");
        assert_eq!(flat["c"], "true");
        assert_eq!(flat["d"], "1, 2");
    }

    #[test]
    fn test_flatten_deep_and_null() {
        let flat = flatten_metadata(&obj(json!({
            "source": {"agency": {"name": "FBI", "code": null}},
            "tags": ["memo", "cable"],
            "pages": 12.5,
            "redacted": false
        })));

        assert_eq!(flat["source.agency.name"], "FBI");
        assert_eq!(flat["source.agency.code"], "");
        assert_eq!(flat["tags"], "memo, cable");
        assert_eq!(flat["pages"], "12.5");
        assert_eq!(flat["redacted"], "false");
    }

    #[test]
    fn test_content_hash_aliases() {
        assert_eq!(content_hash(&obj(json!({"content_hash": "abc"}))), Some("abc"));
        assert_eq!(content_hash(&obj(json!({"sha256": "def"}))), Some("def"));
        assert_eq!(content_hash(&obj(json!({"hash": "", "sha256": "x"}))), Some("x"));
        assert_eq!(content_hash(&obj(json!({"hash": 5}))), None);
        assert_eq!(content_hash(&obj(json!({}))), None);
    }
}
