//! In-memory storage
//!
//! DashMap-backed implementation of every storage trait. Atomic steps hold the
//! relevant map entries locked while they write, which gives the same claim
//! semantics as the conditional deletes of the PostgreSQL backend.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    CeremonyStore, CredentialStore, CredentialWrite, FinalizeCommit, JwkStore, Persister,
    SessionStore, StorageError, TransactionStore, UserStore,
};
use crate::db::{Credential, JwkRecord, SessionData, Transaction, WebauthnUser};

type TenantKey<K> = (String, K);

fn key<K>(tenant_id: &str, k: K) -> TenantKey<K> {
    (tenant_id.to_string(), k)
}

/// In-memory store for development and tests
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<TenantKey<Uuid>, WebauthnUser>,
    credentials: DashMap<TenantKey<String>, Credential>,
    /// keyed by challenge
    sessions: DashMap<TenantKey<String>, SessionData>,
    /// keyed by identifier
    transactions: DashMap<TenantKey<String>, Transaction>,
    /// oldest first; the entry lock serializes provisioning per tenant
    jwks: DashMap<String, Vec<JwkRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user directly, bypassing the registration ceremony.
    pub fn insert_user(&self, user: WebauthnUser) {
        self.users.insert(key(&user.tenant_id, user.id), user);
    }

    /// Seed a credential directly, bypassing the registration ceremony.
    pub fn insert_credential(&self, credential: Credential) {
        self.credentials
            .insert(key(&credential.tenant_id, credential.id.clone()), credential);
    }

    /// Number of live sessions for a tenant
    pub fn session_count(&self, tenant_id: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == tenant_id)
            .count()
    }

    /// Number of live sessions issued to one user
    pub fn session_count_for_user(&self, tenant_id: &str, user_id: Uuid) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == tenant_id && entry.user_id == Some(user_id))
            .count()
    }

    fn claim_session(&self, session: &SessionData) -> Result<(), StorageError> {
        self.sessions
            .remove_if(
                &key(&session.tenant_id, session.challenge.clone()),
                |_, stored| stored.id == session.id,
            )
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("session {}", session.id)))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &SessionData) -> Result<(), StorageError> {
        match self
            .sessions
            .entry(key(&session.tenant_id, session.challenge.clone()))
        {
            Entry::Occupied(_) => Err(StorageError::Conflict("session challenge".into())),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn session_by_challenge(
        &self,
        tenant_id: &str,
        challenge: &str,
    ) -> Result<Option<SessionData>, StorageError> {
        Ok(self
            .sessions
            .get(&key(tenant_id, challenge.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn delete_session(&self, session: &SessionData) -> Result<(), StorageError> {
        self.claim_session(session)
    }

    async fn delete_expired_sessions(&self, tenant_id: &str) -> Result<u64, StorageError> {
        let before = self.session_count(tenant_id);
        self.sessions
            .retain(|(tenant, _), session| tenant != tenant_id || !session.is_expired());
        Ok(before.saturating_sub(self.session_count(tenant_id)) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_by_id(
        &self,
        tenant_id: &str,
        id: Uuid,
    ) -> Result<Option<WebauthnUser>, StorageError> {
        Ok(self
            .users
            .get(&key(tenant_id, id))
            .map(|entry| entry.value().clone()))
    }

    async fn user_by_external_id(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<WebauthnUser>, StorageError> {
        Ok(self
            .users
            .iter()
            .find(|entry| {
                entry.tenant_id == tenant_id && entry.external_user_id == external_user_id
            })
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn credentials_for_user(
        &self,
        tenant_id: &str,
        user_id: Uuid,
    ) -> Result<Vec<Credential>, StorageError> {
        let mut credentials: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|entry| entry.key().0 == tenant_id && entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        credentials.sort_by_key(|c| c.created_at);
        Ok(credentials)
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn transaction_by_identifier(
        &self,
        tenant_id: &str,
        identifier: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        Ok(self
            .transactions
            .get(&key(tenant_id, identifier.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn transaction_by_challenge(
        &self,
        tenant_id: &str,
        challenge: &str,
    ) -> Result<Option<Transaction>, StorageError> {
        Ok(self
            .transactions
            .iter()
            .find(|entry| entry.key().0 == tenant_id && entry.challenge == challenge)
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl JwkStore for MemoryStore {
    async fn jwks(&self, tenant_id: &str) -> Result<Vec<JwkRecord>, StorageError> {
        Ok(self
            .jwks
            .get(tenant_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn latest_jwk(&self, tenant_id: &str) -> Result<Option<JwkRecord>, StorageError> {
        Ok(self
            .jwks
            .get(tenant_id)
            .and_then(|entry| entry.value().last().cloned()))
    }

    async fn count_jwks(&self, tenant_id: &str) -> Result<usize, StorageError> {
        Ok(self.jwks.get(tenant_id).map(|entry| entry.len()).unwrap_or(0))
    }

    async fn insert_jwk(&self, record: &JwkRecord) -> Result<(), StorageError> {
        self.jwks
            .entry(record.tenant_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn provision_jwks(
        &self,
        tenant_id: &str,
        candidates: Vec<JwkRecord>,
        target: usize,
    ) -> Result<usize, StorageError> {
        let mut stored = self.jwks.entry(tenant_id.to_string()).or_default();
        let before = stored.len();
        let missing = target.saturating_sub(before);
        stored.extend(candidates.into_iter().take(missing));
        Ok(stored.len() - before)
    }
}

#[async_trait]
impl CeremonyStore for MemoryStore {
    async fn save_registration_session(
        &self,
        user: &WebauthnUser,
        session: &SessionData,
    ) -> Result<(), StorageError> {
        let existing = self
            .users
            .iter()
            .find(|entry| {
                entry.tenant_id == user.tenant_id
                    && entry.external_user_id == user.external_user_id
            })
            .map(|entry| entry.id);

        if matches!(existing, Some(id) if id != user.id) {
            return Err(StorageError::Conflict(format!(
                "user {}",
                user.external_user_id
            )));
        }

        match self
            .sessions
            .entry(key(&session.tenant_id, session.challenge.clone()))
        {
            Entry::Occupied(_) => Err(StorageError::Conflict("session challenge".into())),
            Entry::Vacant(slot) => {
                self.users
                    .insert(key(&user.tenant_id, user.id), user.clone());
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn save_transaction_session(
        &self,
        transaction: &Transaction,
        session: &SessionData,
    ) -> Result<(), StorageError> {
        let tx_slot = match self
            .transactions
            .entry(key(&transaction.tenant_id, transaction.identifier.clone()))
        {
            Entry::Occupied(_) => {
                return Err(StorageError::Conflict(format!(
                    "transaction {}",
                    transaction.identifier
                )))
            }
            Entry::Vacant(slot) => slot,
        };

        match self
            .sessions
            .entry(key(&session.tenant_id, session.challenge.clone()))
        {
            Entry::Occupied(_) => Err(StorageError::Conflict("session challenge".into())),
            Entry::Vacant(session_slot) => {
                tx_slot.insert(transaction.clone());
                session_slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn commit_finalize(&self, commit: FinalizeCommit) -> Result<(), StorageError> {
        let FinalizeCommit {
            session,
            credential,
        } = commit;

        match credential {
            CredentialWrite::Create(credential) => {
                match self
                    .credentials
                    .entry(key(&credential.tenant_id, credential.id.clone()))
                {
                    Entry::Occupied(_) => {
                        Err(StorageError::Conflict(format!("credential {}", credential.id)))
                    }
                    Entry::Vacant(slot) => {
                        self.claim_session(&session)?;
                        slot.insert(credential);
                        Ok(())
                    }
                }
            }
            CredentialWrite::Update(credential) => {
                let mut stored = self
                    .credentials
                    .get_mut(&key(&credential.tenant_id, credential.id.clone()))
                    .ok_or_else(|| {
                        StorageError::Query(format!("credential {} disappeared", credential.id))
                    })?;
                self.claim_session(&session)?;
                *stored = credential;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Persister for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn check_health(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("users", &self.users.len())
            .field("credentials", &self.credentials.len())
            .field("sessions", &self.sessions.len())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Operation, UserProfile};
    use chrono::{Duration, Utc};
    use serde_json::json;

    const TENANT: &str = "acme";

    fn user(external: &str) -> WebauthnUser {
        WebauthnUser::new(
            TENANT,
            UserProfile {
                user_id: external.to_string(),
                name: external.to_string(),
                display_name: None,
                icon: None,
            },
        )
    }

    fn session(challenge: &str, user_id: Option<Uuid>) -> SessionData {
        SessionData::from_value(
            TENANT,
            challenge,
            Operation::Authentication,
            user_id,
            user_id.is_none(),
            json!({}),
            Duration::seconds(60),
        )
    }

    fn credential(id: &str, user_id: Uuid) -> Credential {
        Credential {
            id: id.to_string(),
            tenant_id: TENANT.to_string(),
            user_id,
            passkey: json!({}),
            attestation_type: "none".to_string(),
            aaguid: Uuid::nil(),
            transports: vec![],
            backup_eligible: false,
            backup_state: false,
            is_mfa: false,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    fn record(tenant_id: &str) -> JwkRecord {
        JwkRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            encrypted_key: vec![0; 8],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_tenant_scoped() {
        let store = MemoryStore::new();
        store.create_session(&session("c1", None)).await.unwrap();

        assert!(store.session_by_challenge(TENANT, "c1").await.unwrap().is_some());
        assert!(store.session_by_challenge("other", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_challenge_conflicts() {
        let store = MemoryStore::new();
        store.create_session(&session("c1", None)).await.unwrap();
        assert!(matches!(
            store.create_session(&session("c1", None)).await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_double_delete_is_surfaced() {
        let store = MemoryStore::new();
        let s = session("c1", None);
        store.create_session(&s).await.unwrap();

        store.delete_session(&s).await.unwrap();
        assert!(matches!(
            store.delete_session(&s).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_claims_session_once() {
        let store = MemoryStore::new();
        let u = user("alice");
        store.insert_user(u.clone());
        store.insert_credential(credential("cred-1", u.id));

        let s = session("c1", Some(u.id));
        store.create_session(&s).await.unwrap();

        let mut updated = credential("cred-1", u.id);
        updated.backup_state = true;
        let commit = FinalizeCommit {
            session: s.clone(),
            credential: CredentialWrite::Update(updated),
        };

        store.commit_finalize(commit.clone()).await.unwrap();
        assert!(matches!(
            store.commit_finalize(commit).await,
            Err(StorageError::NotFound(_))
        ));

        let stored = store.credentials_for_user(TENANT, u.id).await.unwrap();
        assert!(stored[0].backup_state);
        assert_eq!(store.session_count(TENANT), 0);
    }

    #[tokio::test]
    async fn test_commit_create_conflict_keeps_session() {
        let store = MemoryStore::new();
        let u = user("alice");
        store.insert_credential(credential("cred-1", u.id));

        let s = session("c1", Some(u.id));
        store.create_session(&s).await.unwrap();

        let result = store
            .commit_finalize(FinalizeCommit {
                session: s,
                credential: CredentialWrite::Create(credential("cred-1", u.id)),
            })
            .await;

        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(store.session_count(TENANT), 1);
    }

    #[tokio::test]
    async fn test_registration_session_upserts_user() {
        let store = MemoryStore::new();
        let mut u = user("alice");
        store
            .save_registration_session(&u, &session("c1", Some(u.id)))
            .await
            .unwrap();

        u.display_name = "Alice".to_string();
        store
            .save_registration_session(&u, &session("c2", Some(u.id)))
            .await
            .unwrap();

        let stored = store.user_by_external_id(TENANT, "alice").await.unwrap().unwrap();
        assert_eq!(stored.id, u.id);
        assert_eq!(stored.display_name, "Alice");

        // Same external id, different handle
        let other = user("alice");
        assert!(matches!(
            store
                .save_registration_session(&other, &session("c3", Some(other.id)))
                .await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_transaction_identifier_conflicts() {
        let store = MemoryStore::new();
        let u = user("alice");
        let tx = Transaction::new(TENANT, u.id, "tx-1", "pay", "c1");
        store
            .save_transaction_session(&tx, &session("c1", Some(u.id)))
            .await
            .unwrap();

        let again = Transaction::new(TENANT, u.id, "tx-1", "pay more", "c2");
        assert!(matches!(
            store
                .save_transaction_session(&again, &session("c2", Some(u.id)))
                .await,
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(store.session_count(TENANT), 1);

        let found = store.transaction_by_challenge(TENANT, "c1").await.unwrap();
        assert_eq!(found.unwrap().identifier, "tx-1");
    }

    #[tokio::test]
    async fn test_provision_tops_up_to_target() {
        let store = MemoryStore::new();

        let created = store
            .provision_jwks(TENANT, vec![record(TENANT), record(TENANT)], 2)
            .await
            .unwrap();
        assert_eq!(created, 2);

        let created = store
            .provision_jwks(TENANT, vec![record(TENANT), record(TENANT)], 2)
            .await
            .unwrap();
        assert_eq!(created, 0);
        assert_eq!(store.count_jwks(TENANT).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let store = MemoryStore::new();
        let mut expired = session("old", None);
        expired.expires_at = Utc::now() - Duration::seconds(1);
        store.create_session(&expired).await.unwrap();
        store.create_session(&session("new", None)).await.unwrap();

        assert_eq!(store.delete_expired_sessions(TENANT).await.unwrap(), 1);
        assert_eq!(store.session_count(TENANT), 1);
    }
}
