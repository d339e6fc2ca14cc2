//! Registration ceremony
//!
//! Primary registrations ask for a discoverable (resident) credential. Step-up
//! registrations ask for a roaming authenticator and do not need one.

use webauthn_rs::prelude::*;
use webauthn_rs_proto::{AuthenticatorAttachment, ResidentKeyRequirement, UserVerificationPolicy};

use super::attestation::AttestationMetadata;
use super::ceremony::{
    attestation_error, challenge_from_client_data, encode_id, transport_name, Actor, CeremonyCore,
    CeremonyOutcome,
};
use crate::db::{Credential, NewCredential, Operation, SessionData, UserProfile, WebauthnUser};
use crate::error::{ApiError, CeremonyError};
use crate::storage::{CredentialWrite, StorageError};
use crate::tenant::TenantContext;

pub struct RegistrationCeremony {
    core: CeremonyCore,
}

impl RegistrationCeremony {
    pub fn new(ctx: TenantContext) -> Self {
        Self {
            core: CeremonyCore::new(ctx, false, false),
        }
    }

    /// Registration of a step-up credential
    pub fn mfa(ctx: TenantContext) -> Self {
        Self {
            core: CeremonyCore::new(ctx, true, false),
        }
    }

    /// Create or update the user and issue creation options.
    pub async fn initialize(
        &self,
        profile: UserProfile,
    ) -> Result<CreationChallengeResponse, CeremonyError> {
        let actor = Actor::user(profile.user_id.clone());
        self.begin(profile).await.map_err(|e| actor.fail(e))
    }

    async fn begin(&self, profile: UserProfile) -> Result<CreationChallengeResponse, ApiError> {
        self.core.ensure_enabled()?;
        let store = &self.core.context().store;

        let user = match store
            .user_by_external_id(self.core.tenant_id(), &profile.user_id)
            .await?
        {
            Some(mut existing) => {
                existing.apply_profile(profile);
                existing
            }
            None => WebauthnUser::new(self.core.tenant_id(), profile),
        };

        let adapter = self.core.adapter(user).await?;
        let exclude = adapter.exclude_ids()?;

        let (mut ccr, state) = self
            .core
            .webauthn()
            .start_passkey_registration(
                adapter.handle(),
                adapter.name(),
                adapter.display_name(),
                (!exclude.is_empty()).then_some(exclude),
            )
            .map_err(|e| ApiError::internal(format!("Failed to start registration: {:?}", e)))?;

        self.apply_selection(&mut ccr);

        let challenge: Vec<u8> = ccr.public_key.challenge.clone().into();
        let session = self.core.new_session(
            &challenge,
            Operation::Registration,
            Some(adapter.handle()),
            false,
            &state,
        )?;

        store
            .save_registration_session(adapter.user(), &session)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => {
                    ApiError::conflict("user was registered concurrently")
                }
                other => other.into(),
            })?;

        tracing::info!(
            tenant_id = %self.core.tenant_id(),
            user_id = %adapter.user().external_user_id,
            mfa = self.core.use_mfa(),
            operation = %Operation::Registration,
            "Registration started"
        );
        Ok(ccr)
    }

    /// Authenticator selection for this ceremony's pool
    fn apply_selection(&self, ccr: &mut CreationChallengeResponse) {
        let user_verification: UserVerificationPolicy = self.core.user_verification().into();
        let mfa = self.core.use_mfa();

        if let Some(selection) = ccr.public_key.authenticator_selection.as_mut() {
            selection.user_verification = user_verification;
            selection.require_resident_key = !mfa;
            selection.resident_key = Some(if mfa {
                ResidentKeyRequirement::Discouraged
            } else {
                ResidentKeyRequirement::Required
            });
            if mfa {
                selection.authenticator_attachment = Some(AuthenticatorAttachment::CrossPlatform);
            }
        }
    }

    /// Verify the attestation, store the credential and mint a token.
    pub async fn finalize(
        &self,
        response: RegisterPublicKeyCredential,
    ) -> Result<CeremonyOutcome, CeremonyError> {
        self.core.ensure_enabled()?;
        let challenge = challenge_from_client_data(&response.response.client_data_json)?;
        let session = self
            .core
            .resolve_session(&challenge, Operation::Registration, Some(false))
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
        response: &RegisterPublicKeyCredential,
        actor: &mut Actor,
    ) -> Result<CeremonyOutcome, ApiError> {
        let handle = session
            .user_id
            .ok_or_else(|| ApiError::internal("registration session without user"))?;
        let user = self
            .core
            .user_by_handle(handle)
            .await?
            .ok_or_else(|| ApiError::not_found("user"))?;
        actor.user_id = Some(user.external_user_id.clone());

        let state: PasskeyRegistration = session.state()?;
        let passkey = self
            .core
            .webauthn()
            .finish_passkey_registration(response, &state)
            .map_err(attestation_error)?;

        let metadata = AttestationMetadata::parse(&response.response.attestation_object);
        let credential_id = encode_id(passkey.cred_id());
        let transports = response
            .response
            .transports
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(transport_name)
            .collect();

        let credential = Credential::new(
            self.core.tenant_id(),
            user.id,
            &passkey,
            NewCredential {
                id: credential_id.clone(),
                attestation_type: metadata.format.as_str().to_string(),
                aaguid: metadata.aaguid,
                transports,
                backup_eligible: metadata.backup_eligible,
                backup_state: metadata.backup_state,
                is_mfa: self.core.use_mfa(),
            },
        )?;

        self.core
            .commit(session.clone(), CredentialWrite::Create(credential))
            .await?;

        tracing::info!(
            tenant_id = %self.core.tenant_id(),
            user_id = %user.external_user_id,
            credential_id = %credential_id,
            attestation = metadata.format.as_str(),
            mfa = self.core.use_mfa(),
            "Registration completed"
        );

        let token = self
            .core
            .token_generator()
            .generate(&user.external_user_id, &credential_id)
            .await?;

        Ok(CeremonyOutcome {
            token,
            user_id: user.external_user_id,
            transaction: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SessionStore, UserStore};
    use crate::webauthn::test_support::{tenant_context, TestTenant};
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn profile(user_id: &str, name: &str) -> UserProfile {
        UserProfile {
            user_id: user_id.to_string(),
            name: name.to_string(),
            display_name: None,
            icon: None,
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_user_and_session() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;

        let ccr = RegistrationCeremony::new(ctx)
            .initialize(profile("alice", "alice@example.com"))
            .await
            .unwrap();

        let user = store
            .user_by_external_id("acme", "alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ccr.public_key.user.name, "alice@example.com");

        let selection = ccr.public_key.authenticator_selection.unwrap();
        assert!(selection.require_resident_key);
        assert!(matches!(
            selection.resident_key,
            Some(ResidentKeyRequirement::Required)
        ));

        let challenge: Vec<u8> = ccr.public_key.challenge.into();
        let session = store
            .session_by_challenge("acme", &passkey_core::encode_challenge(&challenge))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.operation, Operation::Registration);
        assert_eq!(session.user_id, Some(user.id));
        assert!(!session.is_discoverable);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_handle() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;
        let ceremony = RegistrationCeremony::new(ctx);

        ceremony.initialize(profile("alice", "alice")).await.unwrap();
        let first = store.user_by_external_id("acme", "alice").await.unwrap().unwrap();

        ceremony.initialize(profile("alice", "alice2")).await.unwrap();
        let second = store.user_by_external_id("acme", "alice").await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "alice2");
        assert_eq!(store.session_count_for_user("acme", first.id), 2);
    }

    #[tokio::test]
    async fn test_mfa_registration_asks_for_roaming_authenticator() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(
            &store,
            TestTenant {
                mfa: true,
                ..TestTenant::default()
            },
        )
        .await;

        let ccr = RegistrationCeremony::mfa(ctx)
            .initialize(profile("alice", "alice"))
            .await
            .unwrap();

        let selection = ccr.public_key.authenticator_selection.unwrap();
        assert!(!selection.require_resident_key);
        assert!(matches!(
            selection.authenticator_attachment,
            Some(AuthenticatorAttachment::CrossPlatform)
        ));
    }

    #[tokio::test]
    async fn test_mfa_registration_requires_enabled_tenant() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;

        let err = RegistrationCeremony::mfa(ctx)
            .initialize(profile("alice", "alice"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_id.as_deref(), Some("alice"));
        assert_eq!(store.session_count("acme"), 0);
    }

    #[tokio::test]
    async fn test_finalize_with_unknown_challenge_is_unauthorized() {
        let store = Arc::new(MemoryStore::new());
        let ctx = tenant_context(&store, TestTenant::default()).await;

        let response = crate::webauthn::test_support::registration_response(&[9u8; 32]);
        let err = RegistrationCeremony::new(ctx)
            .finalize(response)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.user_id.is_none());
    }
}
