//! Deterministic JSON canonicalization and content hashing.
//!
//! Used everywhere a stable fingerprint is required: `input_hash` on tool
//! calls, `content_hash` on artifacts, and `input_hash` on compiled model
//! input. Object keys are sorted recursively at every nesting depth —
//! `serde_json::Value`'s own default map ordering is insertion order and is
//! not sufficient on its own.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    #[error("failed to serialize value: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Serialize `value` to its canonical JSON string: object keys sorted
/// lexicographically at every depth, array order preserved.
///
/// Non-finite numbers and arbitrary-precision integers are rejected by
/// construction: this workspace does not enable serde_json's
/// `arbitrary_precision` feature, so `Number::from_f64` already refuses
/// NaN/infinity and out-of-range integers fail to parse into a `Value` at
/// the deserialize boundary, before a canonicalization call ever sees them.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalizeError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_value(v);
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_value(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_value).collect()),
        other => other,
    }
}

/// Hex-encoded SHA-256 digest of `bytes`, without a prefix.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `"sha256:" + hex(sha256(bytes))`, the convention used for every content
/// hash and input hash in the wire schema.
#[must_use]
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(bytes))
}

/// Canonicalize `value` and hash the UTF-8 bytes of its canonical form.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String, CanonicalizeError> {
    let canonical = canonical_json(value)?;
    Ok(sha256_prefixed(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_reordering_does_not_change_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let v = json!({"z": {"y": 1, "x": 2}, "a": 1});
        let s = canonical_json(&v).unwrap();
        assert_eq!(s, r#"{"a":1,"z":{"x":2,"y":1}}"#);
    }

    #[test]
    fn array_order_is_preserved() {
        let v = json!({"items": [3, 1, 2]});
        let s = canonical_json(&v).unwrap();
        assert_eq!(s, r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn non_finite_numbers_cannot_enter_a_value() {
        assert!(serde_json::Number::from_f64(f64::NAN).is_none());
        assert!(serde_json::Number::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn sha256_prefixed_has_expected_form() {
        let h = sha256_prefixed(b"");
        assert!(h.starts_with("sha256:"));
        assert_eq!(h.len(), "sha256:".len() + 64);
    }

    #[test]
    fn hash_is_deterministic() {
        let v = json!({"x": 1});
        assert_eq!(hash_canonical(&v).unwrap(), hash_canonical(&v).unwrap());
    }
}
