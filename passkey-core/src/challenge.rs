//! Challenge encoding and transaction binding.
//!
//! A transaction challenge is the protocol challenge with
//! `SHA-256(identifier || data)` appended. The authenticator signs over the
//! extended value, so the resulting assertion is only valid for that exact
//! transaction.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Length of the transaction digest appended to a challenge
pub const TRANSACTION_DIGEST_LEN: usize = 32;

/// Canonical text form of a challenge: unpadded base64url.
pub fn encode_challenge(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url challenge, tolerating trailing padding.
pub fn decode_challenge(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| CoreError::ChallengeBinding(format!("invalid challenge encoding: {e}")))
}

/// `SHA-256(identifier || data)`
pub fn transaction_digest(identifier: &str, data: &str) -> [u8; TRANSACTION_DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(data.as_bytes());
    hasher.finalize().into()
}

/// Append the transaction digest to a protocol challenge.
pub fn extend_challenge(challenge: &[u8], identifier: &str, data: &str) -> Vec<u8> {
    let digest = transaction_digest(identifier, data);
    let mut extended = Vec::with_capacity(challenge.len() + digest.len());
    extended.extend_from_slice(challenge);
    extended.extend_from_slice(&digest);
    extended
}

/// Replace `original` with `extended` wherever it appears as a `challenge`
/// field inside a serialized ceremony state.
///
/// The state is opaque; the challenge may be stored as a base64url string or as
/// a byte array, and the replacement keeps whichever representation was found.
/// Exactly one occurrence must exist, otherwise the state does not have the
/// shape we expect and binding the transaction would be unsafe.
pub fn rebind_challenge(state: &mut Value, original: &[u8], extended: &[u8]) -> Result<()> {
    let encoded = encode_challenge(original);
    let replaced = rebind_in(state, original, &encoded, extended);

    if replaced != 1 {
        return Err(CoreError::ChallengeBinding(format!(
            "expected exactly one challenge in ceremony state, found {}",
            replaced
        )));
    }

    Ok(())
}

fn rebind_in(value: &mut Value, original: &[u8], encoded: &str, extended: &[u8]) -> usize {
    match value {
        Value::Object(map) => map
            .iter_mut()
            .map(|(key, field)| {
                if key == "challenge" && holds_challenge(field, original, encoded) {
                    *field = replacement(field, extended);
                    1
                } else {
                    rebind_in(field, original, encoded, extended)
                }
            })
            .sum(),
        Value::Array(items) => items
            .iter_mut()
            .map(|item| rebind_in(item, original, encoded, extended))
            .sum(),
        _ => 0,
    }
}

fn holds_challenge(field: &Value, original: &[u8], encoded: &str) -> bool {
    match field {
        Value::String(s) => s.trim_end_matches('=') == encoded,
        Value::Array(items) => {
            items.len() == original.len()
                && items
                    .iter()
                    .zip(original)
                    .all(|(item, byte)| item.as_u64() == Some(u64::from(*byte)))
        }
        _ => false,
    }
}

fn replacement(field: &Value, extended: &[u8]) -> Value {
    match field {
        Value::Array(_) => Value::Array(extended.iter().map(|b| Value::from(*b)).collect()),
        _ => Value::String(encode_challenge(extended)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extension_appends_digest() {
        let challenge = [7u8; 32];
        let extended = extend_challenge(&challenge, "tx-1", "pay 10 EUR");

        assert_eq!(extended.len(), 64);
        assert_eq!(&extended[..32], &challenge);
        assert_eq!(&extended[32..], &transaction_digest("tx-1", "pay 10 EUR"));
    }

    #[test]
    fn test_same_identifier_different_data_never_collide() {
        let challenge = [1u8; 32];
        let a = extend_challenge(&challenge, "tx-1", "pay 10 EUR");
        let b = extend_challenge(&challenge, "tx-1", "pay 1000 EUR");
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_decode_challenge() {
        let bytes = vec![0xfb, 0xff, 0x00, 0x10];
        let encoded = encode_challenge(&bytes);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert_eq!(decode_challenge(&encoded).unwrap(), bytes);
        assert_eq!(decode_challenge(&format!("{encoded}==")).unwrap(), bytes);
        assert!(decode_challenge("!!!").is_err());
    }

    #[test]
    fn test_rebind_string_challenge() {
        let original = vec![1, 2, 3, 4];
        let extended = extend_challenge(&original, "tx", "data");
        let mut state = json!({
            "ast": {
                "challenge": encode_challenge(&original),
                "credentials": [],
                "policy": "required"
            }
        });

        rebind_challenge(&mut state, &original, &extended).unwrap();
        assert_eq!(state["ast"]["challenge"], encode_challenge(&extended));
    }

    #[test]
    fn test_rebind_byte_array_challenge() {
        let original = vec![9, 8, 7];
        let extended = vec![9, 8, 7, 6];
        let mut state = json!({ "rs": { "challenge": [9, 8, 7] } });

        rebind_challenge(&mut state, &original, &extended).unwrap();
        assert_eq!(state["rs"]["challenge"], json!([9, 8, 7, 6]));
    }

    #[test]
    fn test_rebind_requires_single_match() {
        let original = vec![1, 2, 3];
        let mut missing = json!({ "ast": { "challenge": "other" } });
        assert!(rebind_challenge(&mut missing, &original, &[0]).is_err());

        let encoded = encode_challenge(&original);
        let mut twice = json!({ "a": { "challenge": encoded }, "b": { "challenge": encoded } });
        assert!(rebind_challenge(&mut twice, &original, &[0]).is_err());
    }
}
