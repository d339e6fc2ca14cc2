//! Storage module
//!
//! Persistence is expressed as one trait per entity plus [`CeremonyStore`] for
//! the multi-row writes a ceremony step must perform atomically. Every query
//! takes the tenant id; no method can reach another tenant's rows.
//!
//! Two backends implement all of them:
//! - **PostgreSQL** (`DATABASE_URL` set): production storage
//! - **Memory**: development fallback and tests; everything is lost on restart

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Credential, JwkRecord, SessionData, Transaction, WebauthnUser};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A uniqueness constraint was violated
    #[error("{0} already exists")]
    Conflict(String),

    /// A row that had to exist was gone
    #[error("{0} not found")]
    NotFound(String),
}

/// Single-use ceremony sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session; `Conflict` if the challenge is already in use.
    async fn create_session(&self, session: &SessionData) -> Result<(), StorageError>;

    async fn session_by_challenge(
        &self,
        tenant_id: &str,
        challenge: &str,
    ) -> Result<Option<SessionData>, StorageError>;

    /// Remove a session; `NotFound` if it was already consumed.
    async fn delete_session(&self, session: &SessionData) -> Result<(), StorageError>;

    /// Remove the tenant's expired sessions, returning how many were removed.
    async fn delete_expired_sessions(&self, tenant_id: &str) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_id(
        &self,
        tenant_id: &str,
        id: Uuid,
    ) -> Result<Option<WebauthnUser>, StorageError>;

    async fn user_by_external_id(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<WebauthnUser>, StorageError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All of a user's credentials, both pools, oldest first.
    async fn credentials_for_user(
        &self,
        tenant_id: &str,
        user_id: Uuid,
    ) -> Result<Vec<Credential>, StorageError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn transaction_by_identifier(
        &self,
        tenant_id: &str,
        identifier: &str,
    ) -> Result<Option<Transaction>, StorageError>;

    async fn transaction_by_challenge(
        &self,
        tenant_id: &str,
        challenge: &str,
    ) -> Result<Option<Transaction>, StorageError>;
}

#[async_trait]
pub trait JwkStore: Send + Sync {
    /// Every stored key, oldest first.
    async fn jwks(&self, tenant_id: &str) -> Result<Vec<JwkRecord>, StorageError>;

    /// The most recently stored key.
    async fn latest_jwk(&self, tenant_id: &str) -> Result<Option<JwkRecord>, StorageError>;

    async fn count_jwks(&self, tenant_id: &str) -> Result<usize, StorageError>;

    async fn insert_jwk(&self, record: &JwkRecord) -> Result<(), StorageError>;

    /// Top the tenant up to `target` keys, drawing from `candidates`.
    ///
    /// Serialized per tenant: the count is taken again under the tenant's lock,
    /// so concurrent callers never store more than `target` keys between them.
    /// Returns the number of keys stored by this call.
    async fn provision_jwks(
        &self,
        tenant_id: &str,
        candidates: Vec<JwkRecord>,
        target: usize,
    ) -> Result<usize, StorageError>;
}

/// Credential change committed together with the session claim
#[derive(Debug, Clone)]
pub enum CredentialWrite {
    /// New credential from a registration; `Conflict` if the id is taken
    Create(Credential),
    /// Credential updated after a successful assertion
    Update(Credential),
}

/// Everything a successful finalize writes
#[derive(Debug, Clone)]
pub struct FinalizeCommit {
    pub session: SessionData,
    pub credential: CredentialWrite,
}

/// Multi-row ceremony writes, each performed atomically
#[async_trait]
pub trait CeremonyStore: Send + Sync {
    /// Create or update the user (matched by external id) and store the
    /// registration session.
    ///
    /// `Conflict` if another registration created the same external id with a
    /// different handle in the meantime.
    async fn save_registration_session(
        &self,
        user: &WebauthnUser,
        session: &SessionData,
    ) -> Result<(), StorageError>;

    /// Store a transaction and its session; `Conflict` if the identifier is taken.
    async fn save_transaction_session(
        &self,
        transaction: &Transaction,
        session: &SessionData,
    ) -> Result<(), StorageError>;

    /// Claim the session and write the credential.
    ///
    /// The session delete is conditional and is the claim: if the session is
    /// already gone nothing is written and `NotFound` is returned.
    async fn commit_finalize(&self, commit: FinalizeCommit) -> Result<(), StorageError>;
}

/// The full storage surface the server runs on
#[async_trait]
pub trait Persister:
    SessionStore + UserStore + CredentialStore + TransactionStore + JwkStore + CeremonyStore
{
    /// Backend name for logs and health output
    fn backend(&self) -> &'static str;

    async fn check_health(&self) -> Result<(), StorageError>;
}

/// Create storage from configuration
///
/// Uses PostgreSQL if a database URL is configured, otherwise falls back to in-memory.
pub async fn from_config(config: &Config) -> Result<Arc<dyn Persister>, StorageError> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Using PostgreSQL storage");
            let store = PostgresStore::connect(
                url,
                config.database_max_connections,
                config.database_min_connections,
            )
            .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage - all data will be lost on restart!");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
