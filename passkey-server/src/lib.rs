//! Passkey Server Library - multi-tenant WebAuthn authentication
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod storage;
pub mod tenant;
pub mod token;
pub mod validation;
pub mod webauthn;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, TracingAuditLogger};
pub use config::Config;
pub use db::{Credential, Operation, SessionData, Transaction, UserProfile, WebauthnUser};
pub use error::{ApiError, CeremonyError};
pub use keys::{KeyError, KeyManager};
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config, RouterError};
pub use state::AppState;
pub use storage::{MemoryStore, Persister, PostgresStore, StorageError};
pub use tenant::{TenantConfig, TenantContext, TenantDirectory, TenantError};
pub use token::{verify_token, TokenClaims, TokenGenerator};
pub use webauthn::{
    CeremonyOutcome, LoginCeremony, RegistrationCeremony, TokenResponse, TransactionCeremony,
    TransactionPayload,
};
