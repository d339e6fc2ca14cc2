//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use crate::audit::{AuditEntry, AuditLogger, TracingAuditLogger};
use crate::error::ApiError;
use crate::storage::Persister;
use crate::tenant::{lookup, TenantContext, TenantDirectory};

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Tenants loaded at startup
    pub tenants: Arc<TenantDirectory>,
    /// Storage shared by every tenant
    pub store: Arc<dyn Persister>,
    /// Sink for ceremony outcomes
    pub audit: Arc<dyn AuditLogger>,
}

impl AppState {
    /// State with the default tracing audit sink
    pub fn new(tenants: TenantDirectory, store: Arc<dyn Persister>) -> Self {
        Self {
            tenants: Arc::new(tenants),
            store,
            audit: Arc::new(TracingAuditLogger),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Per-request context for `tenant_id`
    pub fn tenant_context(&self, tenant_id: &str) -> Result<TenantContext, ApiError> {
        let tenant = lookup(&self.tenants, tenant_id)?;
        Ok(TenantContext::new(tenant, self.store.clone()))
    }

    /// Record an audit entry. A failing sink never fails the request.
    pub async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!(error = %e, "Failed to record audit entry");
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tenants", &self.tenants.len())
            .field("store", &self.store.backend())
            .finish()
    }
}
