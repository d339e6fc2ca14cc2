//! Ceremony request/response types
//!
//! Initialize responses are the standard WebAuthn options documents produced
//! by webauthn-rs; finalize requests are the browser's credential JSON.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request to start a login
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// External user id; omit for a discoverable login
    #[schema(example = "user-42")]
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Transaction to be confirmed by the user
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TransactionPayload {
    /// Caller-chosen unique id of the transaction
    #[schema(example = "tx-2024-0001")]
    pub identifier: String,
    /// Content the user confirms, bound into the challenge
    #[schema(example = "Transfer 100 EUR to NL91ABNA0417164300")]
    pub data: String,
}

/// Request to start a transaction confirmation
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransactionRequest {
    #[schema(example = "user-42")]
    pub user_id: String,
    pub transaction: TransactionPayload,
}

/// Successful finalize
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Compact JWS signed with the tenant's current key
    pub token: String,
}

/// WebAuthn attestation statement format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttestationFormat {
    /// Standard packed format
    Packed,
    /// TPM attestation (Windows)
    Tpm,
    /// Android Key attestation (hardware-backed)
    AndroidKey,
    /// Android SafetyNet (legacy)
    AndroidSafetyNet,
    /// Apple anonymous attestation
    Apple,
    /// FIDO U2F
    FidoU2f,
    /// No attestation statement
    #[default]
    None,
}

impl AttestationFormat {
    /// Map the `fmt` field of an attestation object.
    pub fn from_fmt(fmt: &str) -> Self {
        match fmt {
            "packed" => Self::Packed,
            "tpm" => Self::Tpm,
            "android-key" => Self::AndroidKey,
            "android-safetynet" => Self::AndroidSafetyNet,
            "apple" => Self::Apple,
            "fido-u2f" => Self::FidoU2f,
            _ => Self::None,
        }
    }

    /// Stored form, as in the `fmt` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::Tpm => "tpm",
            Self::AndroidKey => "android-key",
            Self::AndroidSafetyNet => "android-safetynet",
            Self::Apple => "apple",
            Self::FidoU2f => "fido-u2f",
            Self::None => "none",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_format_mapping() {
        for fmt in ["packed", "tpm", "android-key", "android-safetynet", "apple", "fido-u2f", "none"] {
            assert_eq!(AttestationFormat::from_fmt(fmt).as_str(), fmt);
        }
        assert_eq!(AttestationFormat::from_fmt("compound"), AttestationFormat::None);
    }

    #[test]
    fn test_login_request_user_is_optional() {
        let req: LoginRequest = serde_json::from_str("{}").unwrap();
        assert!(req.user_id.is_none());

        let req: LoginRequest = serde_json::from_str(r#"{"user_id": "alice"}"#).unwrap();
        assert_eq!(req.user_id.as_deref(), Some("alice"));
    }
}
