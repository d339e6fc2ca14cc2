//! Credential entity
//!
//! The protocol library's `Passkey` is kept as an opaque JSON value; it holds
//! the public key and the signature counter. The surrounding columns are the
//! metadata this service reasons about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use webauthn_rs::prelude::{AuthenticationResult, Passkey};

use crate::storage::StorageError;

/// Stored credential
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Credential {
    /// base64url credential id
    pub id: String,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub passkey: serde_json::Value,
    pub attestation_type: String,
    pub aaguid: Uuid,
    pub transports: Vec<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    /// Step-up credentials are never usable for primary login and vice versa
    pub is_mfa: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Metadata captured at registration alongside the passkey
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub id: String,
    pub attestation_type: String,
    pub aaguid: Uuid,
    pub transports: Vec<String>,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub is_mfa: bool,
}

impl Credential {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: Uuid,
        passkey: &Passkey,
        meta: NewCredential,
    ) -> Result<Self, StorageError> {
        let passkey = serde_json::to_value(passkey)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(Self {
            id: meta.id,
            tenant_id: tenant_id.into(),
            user_id,
            passkey,
            attestation_type: meta.attestation_type,
            aaguid: meta.aaguid,
            transports: meta.transports,
            backup_eligible: meta.backup_eligible,
            backup_state: meta.backup_state,
            is_mfa: meta.is_mfa,
            created_at: Utc::now(),
            last_used_at: None,
        })
    }

    /// Parse the stored protocol credential.
    pub fn passkey(&self) -> Result<Passkey, StorageError> {
        serde_json::from_value(self.passkey.clone())
            .map_err(|e| StorageError::Serialization(format!("credential {}: {}", self.id, e)))
    }

    /// Record a successful assertion: counter, backup flags and last use.
    pub fn apply_authentication(
        &mut self,
        result: &AuthenticationResult,
    ) -> Result<(), StorageError> {
        let mut passkey = self.passkey()?;
        passkey.update_credential(result);

        self.passkey = serde_json::to_value(&passkey)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.backup_eligible = result.backup_eligible();
        self.backup_state = result.backup_state();
        self.last_used_at = Some(Utc::now());
        Ok(())
    }
}
