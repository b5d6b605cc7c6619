//! HMAC-SHA256 signatures over canonical JSON.
//!
//! The canonical form sorts object keys at every depth and uses compact
//! separators, so two structurally equal messages always sign identically.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use super::error::SigningError;

type HmacSha256 = Hmac<Sha256>;

/// Copy of `value` with object keys inserted in sorted order at every level.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                if let Some(child) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(child));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn canonical_json(message: &Value) -> Result<String, SigningError> {
    Ok(serde_json::to_string(&canonicalize(message))?)
}

fn keyed_mac(secret: &[u8], message: &Value) -> Result<HmacSha256, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| SigningError::InvalidKey(err.to_string()))?;
    mac.update(canonical_json(message)?.as_bytes());
    Ok(mac)
}

/// Lowercase hex HMAC-SHA256 of the canonical form of `message`.
pub fn create_signature(message: &Value, secret: &[u8]) -> Result<String, SigningError> {
    let mac = keyed_mac(secret, message)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Malformed hex is a mismatch.
#[must_use]
pub fn verify_signature(message: &Value, signature: &str, secret: &[u8]) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    keyed_mac(secret, message).is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"signing-secret";

    #[test]
    fn test_canonical_form_sorts_nested_keys() {
        let message = json!({"b": 1, "a": {"z": true, "c": [ {"y": 1, "x": 2} ]}});
        assert_eq!(
            canonical_json(&message).unwrap(),
            r#"{"a":{"c":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_signature_independent_of_key_order() {
        let first = json!({"user": "42", "action": "send", "n": 3});
        let second = json!({"n": 3, "action": "send", "user": "42"});
        assert_eq!(
            create_signature(&first, SECRET).unwrap(),
            create_signature(&second, SECRET).unwrap()
        );
    }

    #[test]
    fn test_signature_is_lowercase_hex() {
        let signature = create_signature(&json!({"a": 1}), SECRET).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_tampering_is_detected() {
        let message = json!({"conversation_id": "c1", "content": "hello"});
        let signature = create_signature(&message, SECRET).unwrap();

        assert!(verify_signature(&message, &signature, SECRET));
        assert!(!verify_signature(
            &json!({"conversation_id": "c1", "content": "hellO"}),
            &signature,
            SECRET
        ));
        assert!(!verify_signature(&message, &signature, b"other-secret"));
        assert!(!verify_signature(&message, "zz-not-hex", SECRET));
        assert!(!verify_signature(&message, &signature[..62], SECRET));
    }
}
