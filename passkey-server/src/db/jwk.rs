//! Wrapped signing key records

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A signing key encrypted at rest. The record id doubles as the key's `kid`.
#[derive(Clone, FromRow)]
pub struct JwkRecord {
    pub id: Uuid,
    pub tenant_id: String,
    /// nonce || ciphertext
    pub encrypted_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for JwkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkRecord")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("encrypted_key", &format!("<{} bytes>", self.encrypted_key.len()))
            .field("created_at", &self.created_at)
            .finish()
    }
}
