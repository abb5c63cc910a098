//! Payload sanitization
//!
//! Replaces sensitive fields with one-way hash tokens before an entry is
//! buffered. Field matching is a case-insensitive substring check against a
//! fixed vocabulary; values are hashed with truncated SHA-256 so equal inputs
//! map to equal tokens without being reversible.

use serde_json::Value;
use sha2::{Digest, Sha256};

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "ssn",
    "social_security_number",
    "credit_card",
    "bank_account",
    "insurance_number",
    "phone_number",
    "email",
    "address",
    "full_name",
];

/// Walk a payload and replace every sensitive leaf value with a hash token.
pub fn sanitize(payload: &mut Value) {
    match payload {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if value.is_object() || value.is_array() {
                    sanitize(value);
                } else if is_sensitive(key) {
                    *value = Value::String(hash_token(&render(value)));
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize(item);
            }
        }
        _ => {}
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_FIELDS.iter().any(|field| key.contains(field))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One-way token for a sensitive value: `hash_` plus the first 8 bytes of the
/// SHA-256 digest in hex.
pub fn hash_token(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("hash_{}", hex::encode(&digest[..8]))
}
