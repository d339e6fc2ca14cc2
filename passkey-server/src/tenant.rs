//! Tenants
//!
//! Tenant configuration is loaded once at startup from a JSON file. Each tenant
//! gets its own protocol instance and key manager; requests receive them through
//! a [`TenantContext`] rather than through any process-wide state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use webauthn_rs::prelude::Webauthn;

use crate::error::ApiError;
use crate::keys::{KeyError, KeyManager};
use crate::storage::Persister;
use crate::token::{TokenGenerator, DEFAULT_TOKEN_LIFETIME_SECS};
use crate::webauthn::config::{ConfigError, UserVerification, WebAuthnConfig, WebauthnSettings};
use passkey_core::wrap::MIN_SECRET_LEN;

/// Errors loading tenant configuration
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Failed to read tenants file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tenants file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Tenant '{tenant}': {reason}")]
    Invalid { tenant: String, reason: String },

    #[error("Tenant '{tenant}': {source}")]
    Webauthn {
        tenant: String,
        #[source]
        source: ConfigError,
    },

    #[error("Tenant '{tenant}': {source}")]
    Keys {
        tenant: String,
        #[source]
        source: KeyError,
    },
}

/// Step-up (MFA) settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MfaSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub user_verification: UserVerification,
}

/// Configuration of one tenant
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub webauthn: WebauthnSettings,
    #[serde(default)]
    pub mfa: MfaSettings,
    /// Key wrapping secrets, newest first
    pub secrets: Vec<String>,
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
}

fn default_token_lifetime() -> u64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

impl TenantConfig {
    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), TenantError> {
        let invalid = |reason: String| TenantError::Invalid {
            tenant: self.id.clone(),
            reason,
        };

        if self.id.is_empty() || self.id.contains('/') {
            return Err(invalid("id must be non-empty and must not contain '/'".into()));
        }
        if self.webauthn.rp_id.is_empty() {
            return Err(invalid("rp_id is required".into()));
        }
        if self.secrets.is_empty() {
            return Err(invalid("at least one wrapping secret is required".into()));
        }
        if self.secrets.iter().any(|s| s.len() < MIN_SECRET_LEN) {
            return Err(invalid(format!(
                "wrapping secrets must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if self.token_lifetime_secs == 0 {
            return Err(invalid("token_lifetime_secs must be positive".into()));
        }
        Ok(())
    }

    /// Session lifetime, equal to the ceremony timeout
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.webauthn.timeout_ms as i64)
    }
}

/// A loaded tenant
pub struct TenantRuntime {
    pub config: TenantConfig,
    pub webauthn: WebAuthnConfig,
    pub keys: KeyManager,
}

impl TenantRuntime {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn webauthn(&self) -> &Webauthn {
        self.webauthn.webauthn()
    }

    pub fn token_generator(&self) -> TokenGenerator<'_> {
        TokenGenerator::new(
            &self.keys,
            self.config.webauthn.rp_id.clone(),
            self.config.token_lifetime_secs,
        )
    }
}

impl std::fmt::Debug for TenantRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRuntime")
            .field("id", &self.config.id)
            .field("rp_id", &self.config.webauthn.rp_id)
            .field("keys", &self.keys)
            .finish()
    }
}

/// All tenants, keyed by id
#[derive(Debug, Default)]
pub struct TenantDirectory {
    tenants: HashMap<String, Arc<TenantRuntime>>,
}

/// Shape of the tenants file
#[derive(Deserialize)]
struct TenantsFile {
    tenants: Vec<TenantConfig>,
}

impl TenantDirectory {
    /// Load tenants from a JSON file and provision their keys.
    pub async fn load(path: &Path, store: Arc<dyn Persister>) -> Result<Self, TenantError> {
        let raw = std::fs::read_to_string(path)?;
        let file: TenantsFile = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), tenants = file.tenants.len(), "Loaded tenants file");
        Self::from_configs(file.tenants, store).await
    }

    /// Validate configurations, build runtimes and provision keys.
    pub async fn from_configs(
        configs: Vec<TenantConfig>,
        store: Arc<dyn Persister>,
    ) -> Result<Self, TenantError> {
        let mut tenants = HashMap::with_capacity(configs.len());

        for config in configs {
            config.validate()?;
            let tenant = config.id.clone();

            let webauthn =
                WebAuthnConfig::new(&config.webauthn).map_err(|source| TenantError::Webauthn {
                    tenant: tenant.clone(),
                    source,
                })?;

            let keys = KeyManager::new(&tenant, &config.secrets, store.clone())
                .map_err(|source| TenantError::Keys {
                    tenant: tenant.clone(),
                    source,
                })?;
            keys.provision().await.map_err(|source| TenantError::Keys {
                tenant: tenant.clone(),
                source,
            })?;

            if tenants.contains_key(&tenant) {
                return Err(TenantError::Invalid {
                    tenant,
                    reason: "duplicate tenant id".into(),
                });
            }

            tracing::info!(tenant_id = %tenant, rp_id = %config.webauthn.rp_id, mfa = config.mfa.enabled, "Tenant ready");
            tenants.insert(
                tenant,
                Arc::new(TenantRuntime {
                    config,
                    webauthn,
                    keys,
                }),
            );
        }

        Ok(Self { tenants })
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantRuntime>> {
        self.tenants.get(tenant_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

/// Everything a ceremony needs for one request
#[derive(Clone)]
pub struct TenantContext {
    pub tenant: Arc<TenantRuntime>,
    pub store: Arc<dyn Persister>,
}

impl TenantContext {
    pub fn new(tenant: Arc<TenantRuntime>, store: Arc<dyn Persister>) -> Self {
        Self { tenant, store }
    }

    pub fn tenant_id(&self) -> &str {
        self.tenant.id()
    }

    pub fn config(&self) -> &TenantConfig {
        &self.tenant.config
    }
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant", &self.tenant.id())
            .field("store", &self.store.backend())
            .finish()
    }
}

/// Resolve a tenant or fail with `NotFound`.
pub fn lookup(directory: &TenantDirectory, tenant_id: &str) -> Result<Arc<TenantRuntime>, ApiError> {
    directory
        .get(tenant_id)
        .ok_or_else(|| ApiError::not_found(format!("tenant '{}'", tenant_id)))
}
