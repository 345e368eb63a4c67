//! Notification signature scheme.
//!
//! The processor signs notifications over a canonical form of the
//! payload: keys sorted, `key=value` pairs joined with `&`, the `sign`
//! field itself excluded, then the shared API key appended. The
//! signature is the lowercase hex SHA-256 of that string.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Field carrying the signature inside a notification payload.
pub const SIGNATURE_FIELD: &str = "sign";

fn canonical_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compute the signature for a payload with the given API key.
pub fn sign_payload(payload: &Map<String, Value>, api_key: &str) -> String {
    let mut keys: Vec<&String> = payload
        .keys()
        .filter(|k| k.as_str() != SIGNATURE_FIELD)
        .collect();
    keys.sort();

    let mut canonical = String::new();
    for key in keys {
        if !canonical.is_empty() {
            canonical.push('&');
        }
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(&canonical_value(&payload[key]));
    }
    canonical.push_str(api_key);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a payload signature. Comparison is case-insensitive on the
/// hex digest.
pub fn verify_payload(payload: &Map<String, Value>, signature: &str, api_key: &str) -> bool {
    sign_payload(payload, api_key).eq_ignore_ascii_case(signature)
}
