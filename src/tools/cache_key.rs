//! Deterministic cache keys for tool results

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Key plus the digest of the canonical input it was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub key: String,
    pub input_hash: String,
}

impl CacheKey {
    pub fn compute(tool_id: Uuid, input: &Value) -> Self {
        let input_hash = hash_input(input);
        Self {
            key: format!("tool:{}:{}", tool_id, input_hash),
            input_hash,
        }
    }
}

/// Hex SHA-256 of the canonical JSON form
pub fn hash_input(input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(input).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_irrelevant() {
        let tool_id = Uuid::new_v4();
        let a = json!({ "query": "rust", "limit": 5, "opts": { "b": 1, "a": [2, { "y": 1, "x": 0 }] } });
        let b = json!({ "opts": { "a": [2, { "x": 0, "y": 1 }], "b": 1 }, "limit": 5, "query": "rust" });
        assert_eq!(CacheKey::compute(tool_id, &a), CacheKey::compute(tool_id, &b));
    }

    #[test]
    fn test_key_depends_on_tool_and_input() {
        let input = json!({ "q": 1 });
        let first = CacheKey::compute(Uuid::new_v4(), &input);
        let second = CacheKey::compute(Uuid::new_v4(), &input);
        assert_ne!(first.key, second.key);
        assert_eq!(first.input_hash, second.input_hash);

        let other = CacheKey::compute(Uuid::nil(), &json!({ "q": 2 }));
        assert_ne!(other.input_hash, first.input_hash);
    }

    #[test]
    fn test_canonical_form() {
        let value = json!({ "b": "x\"y", "a": [true, null, 1.5] });
        assert_eq!(canonical_json(&value), r#"{"a":[true,null,1.5],"b":"x\"y"}"#);
        assert!(CacheKey::compute(Uuid::nil(), &value)
            .key
            .starts_with("tool:00000000-0000-0000-0000-000000000000:"));
        assert_eq!(hash_input(&value).len(), 64);
    }
}
