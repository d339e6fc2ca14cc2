//! Ceremony session records
//!
//! One record per issued challenge. The protocol library's state is stored as
//! an opaque JSON value; only the metadata around it is interpreted here.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::StorageError;

/// Ceremony a session was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Registration,
    Authentication,
    Transaction,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
            Self::Transaction => "transaction",
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" => Ok(Self::Registration),
            "authentication" => Ok(Self::Authentication),
            "transaction" => Ok(Self::Transaction),
            other => Err(StorageError::Serialization(format!(
                "unknown session operation '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use ceremony session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub id: Uuid,
    pub tenant_id: String,
    /// base64url challenge, unique per tenant
    pub challenge: String,
    pub operation: Operation,
    /// Internal user handle; absent for discoverable login
    pub user_id: Option<Uuid>,
    pub is_discoverable: bool,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new<S: Serialize>(
        tenant_id: impl Into<String>,
        challenge: impl Into<String>,
        operation: Operation,
        user_id: Option<Uuid>,
        is_discoverable: bool,
        state: &S,
        ttl: Duration,
    ) -> Result<Self, StorageError> {
        let state =
            serde_json::to_value(state).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Self::from_value(
            tenant_id,
            challenge,
            operation,
            user_id,
            is_discoverable,
            state,
            ttl,
        ))
    }

    /// Build a session around an already serialized state.
    pub fn from_value(
        tenant_id: impl Into<String>,
        challenge: impl Into<String>,
        operation: Operation,
        user_id: Option<Uuid>,
        is_discoverable: bool,
        state: serde_json::Value,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            challenge: challenge.into(),
            operation,
            user_id,
            is_discoverable,
            state,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Deserialize the protocol state.
    pub fn state<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_value(self.state.clone()).map_err(|e| {
            StorageError::Serialization(format!("session {} state: {}", self.id, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_roundtrip_through_text() {
        for op in [
            Operation::Registration,
            Operation::Authentication,
            Operation::Transaction,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("login".parse::<Operation>().is_err());
    }

    #[test]
    fn test_expiry() {
        let live = SessionData::from_value(
            "acme",
            "abc",
            Operation::Authentication,
            None,
            true,
            serde_json::json!({}),
            Duration::seconds(60),
        );
        assert!(!live.is_expired());

        let dead = SessionData {
            expires_at: Utc::now() - Duration::seconds(1),
            ..live
        };
        assert!(dead.is_expired());
    }
}
