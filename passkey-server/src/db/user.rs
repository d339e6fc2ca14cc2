//! WebAuthn user entity
//!
//! A user is identified by the tenant's own user id (`external_user_id`). The
//! internal `id` is a random UUID used as the WebAuthn user handle, so the
//! tenant's identifiers never reach the authenticator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// User entity from storage
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebauthnUser {
    pub id: Uuid,
    pub tenant_id: String,
    pub external_user_id: String,
    pub name: String,
    pub display_name: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User attributes supplied by the tenant when a registration starts
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UserProfile {
    /// Tenant-side user identifier
    #[schema(example = "user-42")]
    pub user_id: String,
    /// Account name shown by the authenticator
    #[schema(example = "alice@example.com")]
    pub name: String,
    /// Human readable name; defaults to `name`
    #[schema(example = "Alice")]
    pub display_name: Option<String>,
    /// Optional icon URL
    pub icon: Option<String>,
}

impl WebauthnUser {
    /// Create a new user with a fresh handle.
    pub fn new(tenant_id: impl Into<String>, profile: UserProfile) -> Self {
        let now = Utc::now();
        let display_name = profile.display_name.unwrap_or_else(|| profile.name.clone());

        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            external_user_id: profile.user_id,
            name: profile.name,
            display_name,
            icon: profile.icon,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite display attributes on re-registration. Identity is unchanged.
    pub fn apply_profile(&mut self, profile: UserProfile) {
        self.display_name = profile.display_name.unwrap_or_else(|| profile.name.clone());
        self.name = profile.name;
        self.icon = profile.icon;
        self.updated_at = Utc::now();
    }
}
