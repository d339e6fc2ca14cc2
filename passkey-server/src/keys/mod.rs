//! Per-tenant signing key management
//!
//! A tenant holds one stored key per configured wrapping secret. Keys are
//! Ed25519, serialized and encrypted at rest under the active secret. The
//! newest key signs; every stored key is published for verification so tokens
//! signed before a rotation stay verifiable until they expire.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use passkey_core::{CoreError, KeyWrapper, SigningKeyPair};
use uuid::Uuid;

use crate::db::JwkRecord;
use crate::error::ApiError;
use crate::storage::{Persister, StorageError};

/// Key manager errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error(transparent)]
    Crypto(#[from] CoreError),

    #[error(transparent)]
    Persistence(#[from] StorageError),

    #[error("no signing key for tenant {0}")]
    NotFound(String),
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Crypto(e) => ApiError::Crypto(e),
            KeyError::Persistence(e) => ApiError::Storage(e),
            // Minting without a key is a signing failure
            KeyError::NotFound(tenant) => ApiError::Crypto(CoreError::Signing(format!(
                "no signing key for tenant {}",
                tenant
            ))),
        }
    }
}

/// Signing keys of one tenant
pub struct KeyManager {
    tenant_id: String,
    wrapper: KeyWrapper,
    store: Arc<dyn Persister>,
}

impl KeyManager {
    /// Build a manager over the tenant's configured secrets, newest first.
    pub fn new<S: AsRef<str>>(
        tenant_id: impl Into<String>,
        secrets: &[S],
        store: Arc<dyn Persister>,
    ) -> Result<Self, KeyError> {
        Ok(Self {
            tenant_id: tenant_id.into(),
            wrapper: KeyWrapper::new(secrets)?,
            store,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Make sure the tenant has one key per configured secret.
    ///
    /// Returns how many keys were created. Running it again with the same
    /// configuration creates none.
    pub async fn provision(&self) -> Result<usize, KeyError> {
        let target = self.wrapper.len();
        let stored = self.store.count_jwks(&self.tenant_id).await?;
        if stored >= target {
            return Ok(0);
        }

        let candidates = (0..target - stored)
            .map(|_| self.new_record())
            .collect::<Result<Vec<_>, _>>()?;

        let created = self
            .store
            .provision_jwks(&self.tenant_id, candidates, target)
            .await?;

        if created > 0 {
            tracing::info!(
                tenant_id = %self.tenant_id,
                created,
                total = target,
                "Provisioned signing keys"
            );
        }
        Ok(created)
    }

    /// Generate, wrap and store a new key. It becomes the signing key.
    pub async fn generate_key(&self) -> Result<JwkRecord, KeyError> {
        let record = self.new_record()?;
        self.store.insert_jwk(&record).await?;

        tracing::info!(tenant_id = %self.tenant_id, kid = %record.id, "Generated signing key");
        Ok(record)
    }

    /// The newest stored key, decrypted.
    pub async fn signing_key(&self) -> Result<SigningKeyPair, KeyError> {
        let record = self
            .store
            .latest_jwk(&self.tenant_id)
            .await?
            .ok_or_else(|| KeyError::NotFound(self.tenant_id.clone()))?;

        self.open(&record)
    }

    /// Public halves of every stored key.
    ///
    /// Fails if any single key cannot be decrypted; a key is never silently
    /// left out of the published set.
    pub async fn public_keys(&self) -> Result<JwkSet, KeyError> {
        let records = self.store.jwks(&self.tenant_id).await?;

        let keys = records
            .iter()
            .map(|record| self.open(record).map(|key| key.public_jwk()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JwkSet { keys })
    }

    fn new_record(&self) -> Result<JwkRecord, CoreError> {
        let id = Uuid::new_v4();
        let key = SigningKeyPair::generate(id.to_string());
        let encrypted_key = self.wrapper.wrap_key(&key.to_bytes()?)?;

        Ok(JwkRecord {
            id,
            tenant_id: self.tenant_id.clone(),
            encrypted_key,
            created_at: Utc::now(),
        })
    }

    fn open(&self, record: &JwkRecord) -> Result<SigningKeyPair, KeyError> {
        let plaintext = self.wrapper.unwrap_key(&record.encrypted_key).map_err(|e| {
            tracing::error!(tenant_id = %self.tenant_id, kid = %record.id, "Failed to decrypt signing key");
            e
        })?;
        Ok(SigningKeyPair::from_bytes(&plaintext)?)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("tenant_id", &self.tenant_id)
            .field("wrapper", &self.wrapper)
            .finish()
    }
}
