//! Transaction entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A transaction awaiting confirmation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    /// Tenant-chosen identifier, unique per tenant
    pub identifier: String,
    pub data: String,
    /// Extended challenge the confirmation must sign
    pub challenge: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: Uuid,
        identifier: impl Into<String>,
        data: impl Into<String>,
        challenge: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id,
            identifier: identifier.into(),
            data: data.into(),
            challenge: challenge.into(),
            created_at: Utc::now(),
        }
    }
}
