//! Audit sink
//!
//! Handlers record one entry per ceremony step outcome. The default sink
//! writes structured `tracing` events under the `audit` target so they can be
//! routed separately with `RUST_LOG=audit=info`.

use async_trait::async_trait;
use serde::Serialize;

/// Ceremony steps that are audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationInitialize,
    RegistrationFinalize,
    LoginInitialize,
    LoginFinalize,
    MfaRegistrationInitialize,
    MfaRegistrationFinalize,
    MfaLoginInitialize,
    MfaLoginFinalize,
    TransactionInitialize,
    TransactionFinalize,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationInitialize => "registration_initialize",
            Self::RegistrationFinalize => "registration_finalize",
            Self::LoginInitialize => "login_initialize",
            Self::LoginFinalize => "login_finalize",
            Self::MfaRegistrationInitialize => "mfa_registration_initialize",
            Self::MfaRegistrationFinalize => "mfa_registration_finalize",
            Self::MfaLoginInitialize => "mfa_login_initialize",
            Self::MfaLoginFinalize => "mfa_login_finalize",
            Self::TransactionInitialize => "transaction_initialize",
            Self::TransactionFinalize => "transaction_finalize",
        }
    }
}

/// One audited outcome
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub transaction: Option<String>,
    /// Error code when the step failed
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, tenant_id: impl Into<String>) -> Self {
        Self {
            event,
            tenant_id: tenant_id.into(),
            user_id: None,
            transaction: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Audit sink failure: {0}")]
pub struct AuditError(pub String);

#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Writes audit entries as tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if entry.succeeded() {
            tracing::info!(
                target: "audit",
                event = entry.event.as_str(),
                tenant_id = %entry.tenant_id,
                user_id = entry.user_id.as_deref(),
                transaction = entry.transaction.as_deref(),
                "ceremony step succeeded"
            );
        } else {
            tracing::warn!(
                target: "audit",
                event = entry.event.as_str(),
                tenant_id = %entry.tenant_id,
                user_id = entry.user_id.as_deref(),
                transaction = entry.transaction.as_deref(),
                error = entry.error.as_deref(),
                "ceremony step failed"
            );
        }
        Ok(())
    }
}
