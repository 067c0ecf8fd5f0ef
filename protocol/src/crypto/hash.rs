//! # Payload Digests
//!
//! The endorser never signs raw JSON: serializations of the same value can
//! differ in whitespace and key order between agents. Instead we sign the
//! BLAKE3 digest of a canonical encoding, where object keys are sorted
//! recursively and no insignificant whitespace is emitted.

use serde::Serialize;
use serde_json::Value;

/// BLAKE3 digest of arbitrary bytes.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Canonical JSON bytes of `value`: keys sorted at every level.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&sort_keys(value))
}

/// Digest of the canonical JSON encoding of `value`.
pub fn payload_digest<T: Serialize>(value: &T) -> Result<[u8; 32], serde_json::Error> {
    Ok(blake3_hash(&canonical_json(value)?))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            // Map keeps insertion order under `preserve_order`.
            let sorted: std::collections::BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_digest() {
        let a = json!({"name": "degree", "version": "1.0", "attrs": {"b": 1, "a": 2}});
        let b = json!({"attrs": {"a": 2, "b": 1}, "version": "1.0", "name": "degree"});
        assert_eq!(payload_digest(&a).unwrap(), payload_digest(&b).unwrap());
    }

    #[test]
    fn different_payloads_differ() {
        let a = json!({"name": "degree"});
        let b = json!({"name": "diploma"});
        assert_ne!(payload_digest(&a).unwrap(), payload_digest(&b).unwrap());
    }

    #[test]
    fn canonical_json_is_compact() {
        let bytes = canonical_json(&json!({"b": [1, 2], "a": null})).unwrap();
        assert_eq!(bytes, br#"{"a":null,"b":[1,2]}"#.to_vec());
    }
}
