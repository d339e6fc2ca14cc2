//! Login ceremony
//!
//! A login is targeted when the caller names the user and discoverable
//! otherwise. Step-up logins are always targeted and only see step-up
//! credentials.

use webauthn_rs::prelude::*;
use webauthn_rs_proto::UserVerificationPolicy;

use super::ceremony::{
    challenge_from_client_data, normalize_user_handle, strip_internal_transports, Actor,
    CeremonyCore, CeremonyOutcome,
};
use crate::db::{Operation, SessionData};
use crate::error::{ApiError, CeremonyError};
use crate::storage::CredentialWrite;
use crate::tenant::TenantContext;

pub struct LoginCeremony {
    core: CeremonyCore,
}

impl LoginCeremony {
    pub fn new(ctx: TenantContext) -> Self {
        Self {
            core: CeremonyCore::new(ctx, false, false),
        }
    }

    /// Step-up login against the user's MFA credentials
    pub fn mfa(ctx: TenantContext) -> Self {
        Self {
            core: CeremonyCore::new(ctx, true, false),
        }
    }

    /// Issue assertion options, targeted at `user_id` when given.
    pub async fn initialize(
        &self,
        user_id: Option<String>,
    ) -> Result<RequestChallengeResponse, CeremonyError> {
        let actor = Actor {
            user_id: user_id.clone(),
            transaction: None,
        };
        self.begin(user_id).await.map_err(|e| actor.fail(e))
    }

    async fn begin(&self, user_id: Option<String>) -> Result<RequestChallengeResponse, ApiError> {
        self.core.ensure_enabled()?;

        let (mut rcr, session) = match user_id {
            Some(external_id) => {
                let user = self.core.user_by_external_id(&external_id).await?;
                let adapter = self.core.adapter(user).await?;
                if adapter.is_empty() {
                    return Err(ApiError::bad_request("user has no registered credentials"));
                }

                let (rcr, state) = self
                    .core
                    .webauthn()
                    .start_passkey_authentication(&adapter.passkeys()?)
                    .map_err(|e| {
                        ApiError::internal(format!("Failed to start authentication: {:?}", e))
                    })?;

                let challenge: Vec<u8> = rcr.public_key.challenge.clone().into();
                let session = self.core.new_session(
                    &challenge,
                    Operation::Authentication,
                    Some(adapter.handle()),
                    false,
                    &state,
                )?;
                (rcr, session)
            }
            None if self.core.use_mfa() => {
                return Err(ApiError::bad_request("user_id is required for step-up login"));
            }
            None => {
                let (rcr, state) = self
                    .core
                    .webauthn()
                    .start_discoverable_authentication()
                    .map_err(|e| {
                        ApiError::internal(format!("Failed to start authentication: {:?}", e))
                    })?;

                let challenge: Vec<u8> = rcr.public_key.challenge.clone().into();
                let session = self.core.new_session(
                    &challenge,
                    Operation::Authentication,
                    None,
                    true,
                    &state,
                )?;
                (rcr, session)
            }
        };

        let user_verification: UserVerificationPolicy = self.core.user_verification().into();
        rcr.public_key.user_verification = user_verification;
        strip_internal_transports(&mut rcr);

        self.core.context().store.create_session(&session).await?;

        tracing::info!(
            tenant_id = %self.core.tenant_id(),
            discoverable = session.is_discoverable,
            mfa = self.core.use_mfa(),
            operation = %Operation::Authentication,
            "Login started"
        );
        Ok(rcr)
    }

    /// Verify the assertion, update the credential and mint a token.
    pub async fn finalize(
        &self,
        response: PublicKeyCredential,
    ) -> Result<CeremonyOutcome, CeremonyError> {
        self.core.ensure_enabled()?;
        let challenge = challenge_from_client_data(&response.response.client_data_json)?;

        // Step-up sessions are never discoverable
        let discoverable = self.core.use_mfa().then_some(false);
        let session = self
            .core
            .resolve_session(&challenge, self.core.assertion_operation(), discoverable)
            .await?;

        let mut actor = Actor::default();
        match self.complete(&session, &response, &mut actor).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.core.discard_session(&session).await;
                Err(actor.fail(e))
            }
        }
    }

    async fn complete(
        &self,
        session: &SessionData,
        response: &PublicKeyCredential,
        actor: &mut Actor,
    ) -> Result<CeremonyOutcome, ApiError> {
        let from_session = !session.is_discoverable || self.core.use_mfa();
        let handle = if from_session {
            session
                .user_id
                .ok_or_else(|| ApiError::internal("targeted session without user"))?
        } else {
            let handle = response
                .response
                .user_handle
                .as_ref()
                .ok_or_else(|| ApiError::bad_request("missing user handle"))?;
            normalize_user_handle(handle)?
        };

        let user = match self.core.user_by_handle(handle).await? {
            Some(user) => user,
            // Unknown handles from the authenticator are not confirmed
            None if !from_session => {
                return Err(ApiError::unauthorized("failed to validate assertion"))
            }
            None => return Err(ApiError::not_found("user")),
        };
        actor.user_id = Some(user.external_user_id.clone());
        let external_id = user.external_user_id.clone();

        let credential = self.core.verify_assertion(session, user, response).await?;
        let credential_id = credential.id.clone();

        self.core
            .commit(session.clone(), CredentialWrite::Update(credential))
            .await?;

        tracing::info!(
            tenant_id = %self.core.tenant_id(),
            user_id = %external_id,
            credential_id = %credential_id,
            mfa = self.core.use_mfa(),
            "Login completed"
        );

        let token = self
            .core
            .token_generator()
            .generate(&external_id, &credential_id)
            .await?;

        Ok(CeremonyOutcome {
            token,
            user_id: external_id,
            transaction: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SessionStore};
    use crate::webauthn::ceremony::CHALLENGE_MISMATCH;
    use crate::webauthn::test_support::{
        assertion_response, seed_user, tenant_context, TestTenant,
    };
    use axum::http::StatusCode;
    use passkey_core::encode_challenge;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_discoverable_login_initialize() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;

        let rcr = LoginCeremony::new(ctx).initialize(None).await.unwrap();
        assert!(rcr.public_key.allow_credentials.is_empty());

        let challenge: Vec<u8> = rcr.public_key.challenge.into();
        let session = store
            .session_by_challenge("acme", &encode_challenge(&challenge))
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_discoverable);
        assert!(session.user_id.is_none());
        assert_eq!(session.operation, Operation::Authentication);
    }

    #[tokio::test]
    async fn test_targeted_login_needs_credentials() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        seed_user(&store, "alice", &[]);

        let err = LoginCeremony::new(ctx.clone())
            .initialize(Some("alice".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_id.as_deref(), Some("alice"));

        let err = LoginCeremony::new(ctx)
            .initialize(Some("bob".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fabricated_challenge_leaves_sessions_alone() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        let alice = seed_user(&store, "alice", &[("primary", false)]);

        // Seeded credentials hold no real key material, so the targeted
        // session is stored directly.
        let session = stored_session(&store, Some(alice.id), Operation::Authentication, false).await;
        assert_eq!(store.session_count_for_user("acme", alice.id), 1);

        let response = assertion_response(&[0xAB; 32], b"primary", None);
        let err = LoginCeremony::new(ctx)
            .finalize(response)
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error.to_string(), format!("Unauthorized: {}", CHALLENGE_MISMATCH));
        assert_eq!(store.session_count_for_user("acme", alice.id), 1);
        assert!(store
            .session_by_challenge("acme", &session.challenge)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_transaction_session_cannot_finish_login() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        let alice = seed_user(&store, "alice", &[("primary", false)]);

        let session = stored_session(&store, Some(alice.id), Operation::Transaction, false).await;
        let challenge = passkey_core::decode_challenge(&session.challenge).unwrap();

        let err = LoginCeremony::new(ctx)
            .finalize(assertion_response(&challenge, b"primary", None))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        // Mismatched sessions are not consumed
        assert_eq!(store.session_count_for_user("acme", alice.id), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected_and_consumed() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        let alice = seed_user(&store, "alice", &[("primary", false)]);

        let mut session = SessionData::from_value(
            "acme",
            encode_challenge(&[3u8; 32]),
            Operation::Authentication,
            Some(alice.id),
            false,
            serde_json::json!({}),
            chrono::Duration::seconds(60),
        );
        session.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        store.create_session(&session).await.unwrap();

        let err = LoginCeremony::new(ctx)
            .finalize(assertion_response(&[3u8; 32], b"primary", None))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(store.session_count_for_user("acme", alice.id), 0);
    }

    #[tokio::test]
    async fn test_primary_login_rejects_step_up_credential() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        let alice = seed_user(&store, "alice", &[("primary", false), ("step-up", true)]);

        let session = stored_session(&store, Some(alice.id), Operation::Authentication, false).await;
        let challenge = passkey_core::decode_challenge(&session.challenge).unwrap();

        let err = LoginCeremony::new(ctx)
            .finalize(assertion_response(&challenge, b"step-up", None))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_id.as_deref(), Some("alice"));
        // Resolved sessions are consumed even on failure
        assert_eq!(store.session_count_for_user("acme", alice.id), 0);
    }

    #[tokio::test]
    async fn test_discoverable_login_resolves_legacy_string_handle() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        let alice = seed_user(&store, "alice", &[("step-up", true)]);

        let session = stored_session(&store, None, Operation::Authentication, true).await;
        let challenge = passkey_core::decode_challenge(&session.challenge).unwrap();
        let handle = alice.id.to_string();

        let err = LoginCeremony::new(ctx)
            .finalize(assertion_response(&challenge, b"step-up", Some(handle.as_bytes())))
            .await
            .unwrap_err();

        // The handle resolved to alice, then the pool check rejected the credential
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_mfa_login_requires_user() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(
            &store,
            TestTenant {
                mfa: true,
                ..TestTenant::default()
            },
        )
        .await;

        let err = LoginCeremony::mfa(ctx).initialize(None).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(store.session_count("acme"), 0);
    }

    async fn stored_session(
        store: &Arc<MemoryStore>,
        user_id: Option<uuid::Uuid>,
        operation: Operation,
        discoverable: bool,
    ) -> SessionData {
        let session = SessionData::from_value(
            "acme",
            encode_challenge(uuid::Uuid::new_v4().as_bytes()),
            operation,
            user_id,
            discoverable,
            serde_json::json!({}),
            chrono::Duration::seconds(60),
        );
        store.create_session(&session).await.unwrap();
        session
    }
}
