//! Token minting and verification
//!
//! Tokens are compact JWS signed with the tenant's newest Ed25519 key. The
//! header carries the `kid`, so verifiers pick the right key from the tenant's
//! published JWKS.

use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use passkey_core::CoreError;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::keys::KeyManager;

/// Default token lifetime in seconds
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 300;

/// Claims of an issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Tenant-side user id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// The tenant's relying party id
    pub aud: Vec<String>,
    /// base64url credential id used for the ceremony
    pub cred: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

/// Mints tokens for one tenant
pub struct TokenGenerator<'a> {
    keys: &'a KeyManager,
    audience: String,
    lifetime_secs: u64,
}

impl<'a> TokenGenerator<'a> {
    pub fn new(keys: &'a KeyManager, audience: impl Into<String>, lifetime_secs: u64) -> Self {
        Self {
            keys,
            audience: audience.into(),
            lifetime_secs,
        }
    }

    /// Token for a completed login or registration.
    pub async fn generate(&self, user_id: &str, credential_id: &str) -> Result<String, ApiError> {
        self.sign(user_id, credential_id, None).await
    }

    /// Token for a confirmed transaction.
    pub async fn generate_for_transaction(
        &self,
        user_id: &str,
        credential_id: &str,
        transaction: &str,
    ) -> Result<String, ApiError> {
        self.sign(user_id, credential_id, Some(transaction)).await
    }

    async fn sign(
        &self,
        user_id: &str,
        credential_id: &str,
        transaction: Option<&str>,
    ) -> Result<String, ApiError> {
        let key = self.keys.signing_key().await?;

        let iat = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            iat,
            exp: iat + self.lifetime_secs as i64,
            aud: vec![self.audience.clone()],
            cred: credential_id.to_string(),
            transaction: transaction.map(str::to_string),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key.kid().to_string());

        encode(&header, &claims, &key.encoding_key()?)
            .map_err(|e| ApiError::Crypto(CoreError::Signing(e.to_string())))
    }
}

/// Verify a token against a tenant's published keys.
pub fn verify_token(token: &str, jwks: &JwkSet, audience: &str) -> Result<TokenClaims, ApiError> {
    let header = decode_header(token)
        .map_err(|e| ApiError::unauthorized(format!("Invalid token header: {}", e)))?;

    let kid = header
        .kid
        .ok_or_else(|| ApiError::unauthorized("Token header missing 'kid' field"))?;

    let jwk = jwks
        .find(&kid)
        .ok_or_else(|| ApiError::unauthorized(format!("No matching key found for kid '{}'", kid)))?;

    let decoding_key = DecodingKey::from_jwk(jwk)
        .map_err(|e| ApiError::internal(format!("Failed to process signing key: {}", e)))?;

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = true;
    validation.set_audience(&[audience]);

    let data = decode::<TokenClaims>(token, &decoding_key, &validation).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ApiError::unauthorized("Token has expired")
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::unauthorized("Invalid token signature")
            }
            jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                ApiError::unauthorized("Token audience mismatch")
            }
            _ => ApiError::unauthorized(format!("Token validation failed: {}", e)),
        }
    })?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Persister};
    use std::sync::Arc;

    async fn provisioned(tenant: &str, store: Arc<dyn Persister>) -> KeyManager {
        let keys = KeyManager::new(tenant, &["a-wrapping-secret-for-tests"], store).unwrap();
        keys.provision().await.unwrap();
        keys
    }

    #[tokio::test]
    async fn test_token_roundtrip() {
        let store: Arc<dyn Persister> = Arc::new(MemoryStore::new());
        let keys = provisioned("acme", store).await;

        let token = TokenGenerator::new(&keys, "acme.example", 300)
            .generate("alice", "cred-1")
            .await
            .unwrap();

        let claims = verify_token(&token, &keys.public_keys().await.unwrap(), "acme.example")
            .unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.cred, "cred-1");
        assert_eq!(claims.aud, vec!["acme.example".to_string()]);
        assert_eq!(claims.exp - claims.iat, 300);
        assert!(claims.transaction.is_none());
    }

    #[tokio::test]
    async fn test_token_fails_against_other_tenant_keys() {
        let store: Arc<dyn Persister> = Arc::new(MemoryStore::new());
        let acme = provisioned("acme", store.clone()).await;
        let globex = provisioned("globex", store).await;

        let token = TokenGenerator::new(&acme, "acme.example", 300)
            .generate("alice", "cred-1")
            .await
            .unwrap();

        let other = globex.public_keys().await.unwrap();
        assert!(verify_token(&token, &other, "acme.example").is_err());
    }

    #[tokio::test]
    async fn test_transaction_claim_and_audience() {
        let store: Arc<dyn Persister> = Arc::new(MemoryStore::new());
        let keys = provisioned("acme", store).await;
        let jwks = keys.public_keys().await.unwrap();

        let token = TokenGenerator::new(&keys, "acme.example", 60)
            .generate_for_transaction("alice", "cred-1", "tx-1")
            .await
            .unwrap();

        let claims = verify_token(&token, &jwks, "acme.example").unwrap();
        assert_eq!(claims.transaction.as_deref(), Some("tx-1"));
        assert!(verify_token(&token, &jwks, "globex.example").is_err());
    }

    #[tokio::test]
    async fn test_tokens_survive_key_rotation() {
        let store: Arc<dyn Persister> = Arc::new(MemoryStore::new());
        let keys = provisioned("acme", store).await;

        let before = TokenGenerator::new(&keys, "acme.example", 300)
            .generate("alice", "cred-1")
            .await
            .unwrap();
        keys.generate_key().await.unwrap();

        let jwks = keys.public_keys().await.unwrap();
        assert!(verify_token(&before, &jwks, "acme.example").is_ok());
    }
}
