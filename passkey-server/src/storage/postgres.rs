//! PostgreSQL storage
//!
//! Every ceremony step that writes more than one row runs in a single
//! transaction. Session claims are conditional deletes, so two requests racing
//! on one challenge cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    CeremonyStore, CredentialStore, CredentialWrite, FinalizeCommit, JwkStore, Persister,
    SessionStore, StorageError, TransactionStore, UserStore,
};
use crate::db::{Credential, JwkRecord, Operation, SessionData, Transaction, WebauthnUser};

/// PostgreSQL-backed storage
pub struct PostgresStore {
    pool: PgPool,
}

fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

/// Map unique violations to `Conflict`, everything else to `Query`.
fn insert_error(what: &str, e: sqlx::Error) -> StorageError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StorageError::Conflict(what.to_string()),
        _ => query_error(e),
    }
}

impl PostgresStore {
    /// Connect a new pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

/// Database row for sessions
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    tenant_id: String,
    challenge: String,
    operation: String,
    user_id: Option<Uuid>,
    is_discoverable: bool,
    state: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for SessionData {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(SessionData {
            id: row.id,
            tenant_id: row.tenant_id,
            challenge: row.challenge,
            operation: row.operation.parse::<Operation>()?,
            user_id: row.user_id,
            is_discoverable: row.is_discoverable,
            state: row.state,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

const SESSION_COLUMNS: &str = "id, tenant_id, challenge, operation, user_id, is_discoverable, \
                               state, created_at, expires_at";

const INSERT_SESSION: &str = r#"
    INSERT INTO webauthn_sessions
        (id, tenant_id, challenge, operation, user_id, is_discoverable, state,
         created_at, expires_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

fn bind_session<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    session: &'q SessionData,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(session.id)
        .bind(&session.tenant_id)
        .bind(&session.challenge)
        .bind(session.operation.as_str())
        .bind(session.user_id)
        .bind(session.is_discoverable)
        .bind(&session.state)
        .bind(session.created_at)
        .bind(session.expires_at)
}

const CREDENTIAL_COLUMNS: &str = "id, tenant_id, user_id, passkey, attestation_type, aaguid, \
                                  transports, backup_eligible, backup_state, is_mfa, \
                                  created_at, last_used_at";

#[async_trait]
impl SessionStore for PostgresStore {
    async fn create_session(&self, session: &SessionData) -> Result<(), StorageError> {
        bind_session(sqlx::query(INSERT_SESSION), session)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error("session challenge", e))?;
        Ok(())
    }

    async fn session_by_challenge(
        &self,
        tenant_id: &str,
        challenge: &str,
    ) -> Result<Option<SessionData>, StorageError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM webauthn_sessions WHERE tenant_id = $1 AND challenge = $2",
            SESSION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(challenge)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(SessionData::try_from).transpose()
    }

    async fn delete_session(&self, session: &SessionData) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM webauthn_sessions WHERE tenant_id = $1 AND id = $2")
            .bind(&session.tenant_id)
            .bind(session.id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn delete_expired_sessions(&self, tenant_id: &str) -> Result<u64, StorageError> {
        let result =
            sqlx::query("DELETE FROM webauthn_sessions WHERE tenant_id = $1 AND expires_at <= NOW()")
                .bind(tenant_id)
                .execute(&self.pool)
                .await
                .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn user_by_id(
        &self,
        tenant_id: &str,
        id: Uuid,
    ) -> Result<Option<WebauthnUser>, StorageError> {
        sqlx::query_as::<_, WebauthnUser>(
            r#"
            SELECT id, tenant_id, external_user_id, name, display_name, icon,
                   created_at, updated_at
            FROM webauthn_users
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }

    async fn user_by_external_id(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<WebauthnUser>, StorageError> {
        sqlx::query_as::<_, WebauthnUser>(
            r#"
            SELECT id, tenant_id, external_user_id, name, display_name, icon,
                   created_at, updated_at
            FROM webauthn_users
            WHERE tenant_id = $1 AND external_user_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn credentials_for_user(
        &self,
        tenant_id: &str,
        user_id: Uuid,
    ) -> Result<Vec<Credential>, StorageError> {
        sqlx::query_as::<_, Credential>(&format!(
            "SELECT {} FROM webauthn_credentials WHERE tenant_id = $1 AND user_id = $2 \
             ORDER BY created_at",
            CREDENTIAL_COLUMNS
        ))
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn transaction_by_identifier(
        &self,
        tenant_id: &str,
        identifier: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, tenant_id, user_id, identifier, data, challenge, created_at
            FROM webauthn_transactions
            WHERE tenant_id = $1 AND identifier = $2
            "#,
        )
        .bind(tenant_id)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }

    async fn transaction_by_challenge(
        &self,
        tenant_id: &str,
        challenge: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, tenant_id, user_id, identifier, data, challenge, created_at
            FROM webauthn_transactions
            WHERE tenant_id = $1 AND challenge = $2
            "#,
        )
        .bind(tenant_id)
        .bind(challenge)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }
}

#[async_trait]
impl JwkStore for PostgresStore {
    async fn jwks(&self, tenant_id: &str) -> Result<Vec<JwkRecord>, StorageError> {
        sqlx::query_as::<_, JwkRecord>(
            "SELECT id, tenant_id, encrypted_key, created_at FROM jwks \
             WHERE tenant_id = $1 ORDER BY seq",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)
    }

    async fn latest_jwk(&self, tenant_id: &str) -> Result<Option<JwkRecord>, StorageError> {
        sqlx::query_as::<_, JwkRecord>(
            "SELECT id, tenant_id, encrypted_key, created_at FROM jwks \
             WHERE tenant_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }

    async fn count_jwks(&self, tenant_id: &str) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jwks WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(count as usize)
    }

    async fn insert_jwk(&self, record: &JwkRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO jwks (id, tenant_id, encrypted_key, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.encrypted_key)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error("jwk", e))?;
        Ok(())
    }

    async fn provision_jwks(
        &self,
        tenant_id: &str,
        candidates: Vec<JwkRecord>,
        target: usize,
    ) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        // Held until commit; serializes provisioning of this tenant across instances
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jwks WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(query_error)?;

        let missing = target.saturating_sub(count as usize);
        let mut created = 0;
        for record in candidates.iter().take(missing) {
            sqlx::query(
                "INSERT INTO jwks (id, tenant_id, encrypted_key, created_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(record.id)
            .bind(&record.tenant_id)
            .bind(&record.encrypted_key)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error("jwk", e))?;
            created += 1;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(created)
    }
}

#[async_trait]
impl CeremonyStore for PostgresStore {
    async fn save_registration_session(
        &self,
        user: &WebauthnUser,
        session: &SessionData,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let stored_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO webauthn_users
                (id, tenant_id, external_user_id, name, display_name, icon,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, external_user_id) DO UPDATE SET
                name = EXCLUDED.name,
                display_name = EXCLUDED.display_name,
                icon = EXCLUDED.icon,
                updated_at = EXCLUDED.updated_at
            RETURNING id
            "#,
        )
        .bind(user.id)
        .bind(&user.tenant_id)
        .bind(&user.external_user_id)
        .bind(&user.name)
        .bind(&user.display_name)
        .bind(&user.icon)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error)?;

        if stored_id != user.id {
            // Dropping the transaction rolls it back
            return Err(StorageError::Conflict(format!(
                "user {}",
                user.external_user_id
            )));
        }

        bind_session(sqlx::query(INSERT_SESSION), session)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error("session challenge", e))?;

        tx.commit().await.map_err(query_error)
    }

    async fn save_transaction_session(
        &self,
        transaction: &Transaction,
        session: &SessionData,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"
            INSERT INTO webauthn_transactions
                (id, tenant_id, user_id, identifier, data, challenge, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.tenant_id)
        .bind(transaction.user_id)
        .bind(&transaction.identifier)
        .bind(&transaction.data)
        .bind(&transaction.challenge)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(&format!("transaction {}", transaction.identifier), e))?;

        bind_session(sqlx::query(INSERT_SESSION), session)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error("session challenge", e))?;

        tx.commit().await.map_err(query_error)
    }

    async fn commit_finalize(&self, commit: FinalizeCommit) -> Result<(), StorageError> {
        let FinalizeCommit {
            session,
            credential,
        } = commit;

        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let claimed = sqlx::query("DELETE FROM webauthn_sessions WHERE tenant_id = $1 AND id = $2")
            .bind(&session.tenant_id)
            .bind(session.id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        if claimed.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("session {}", session.id)));
        }

        match credential {
            CredentialWrite::Create(credential) => {
                sqlx::query(
                    r#"
                    INSERT INTO webauthn_credentials
                        (id, tenant_id, user_id, passkey, attestation_type, aaguid,
                         transports, backup_eligible, backup_state, is_mfa,
                         created_at, last_used_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(&credential.id)
                .bind(&credential.tenant_id)
                .bind(credential.user_id)
                .bind(&credential.passkey)
                .bind(&credential.attestation_type)
                .bind(credential.aaguid)
                .bind(&credential.transports)
                .bind(credential.backup_eligible)
                .bind(credential.backup_state)
                .bind(credential.is_mfa)
                .bind(credential.created_at)
                .bind(credential.last_used_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| insert_error(&format!("credential {}", credential.id), e))?;
            }
            CredentialWrite::Update(credential) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE webauthn_credentials
                    SET passkey = $3, backup_eligible = $4, backup_state = $5,
                        last_used_at = $6
                    WHERE tenant_id = $1 AND id = $2
                    "#,
                )
                .bind(&credential.tenant_id)
                .bind(&credential.id)
                .bind(&credential.passkey)
                .bind(credential.backup_eligible)
                .bind(credential.backup_state)
                .bind(credential.last_used_at)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;

                if updated.rows_affected() == 0 {
                    return Err(StorageError::Query(format!(
                        "credential {} disappeared",
                        credential.id
                    )));
                }
            }
        }

        tx.commit().await.map_err(query_error)
    }
}

#[async_trait]
impl Persister for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}
