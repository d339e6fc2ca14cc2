//! Shared ceremony core
//!
//! Registration, login, step-up login and transaction confirmation all run on
//! one [`CeremonyCore`], parameterized by the credential pool it works with
//! and whether it binds a transaction. The variants only add their own
//! initialize/finalize sequencing.
//!
//! Finalize contract:
//! 1. The session is looked up by the challenge found in the client data.
//! 2. A session of another operation, or with the wrong discoverable flag, is
//!    reported exactly like a missing one and is left untouched.
//! 3. From the moment a matching session is resolved it is consumed: the
//!    success path deletes it together with the credential write, any failure
//!    discards it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webauthn_rs::prelude::*;
use webauthn_rs_proto::AuthenticatorTransport;

use super::adapter::WebauthnUserAdapter;
use super::config::UserVerification;
use crate::db::{Credential, Operation, SessionData, WebauthnUser};
use crate::error::{ApiError, CeremonyError};
use crate::storage::{CredentialWrite, FinalizeCommit, StorageError};
use crate::tenant::TenantContext;
use crate::token::TokenGenerator;
use passkey_core::{decode_challenge, encode_challenge};

/// Reported for every finalize that does not resolve a matching session
pub const CHALLENGE_MISMATCH: &str = "received challenge does not match with any stored one";

/// Result of a successful finalize
#[derive(Debug, Clone)]
pub struct CeremonyOutcome {
    pub token: String,
    /// External user id the token was issued to
    pub user_id: String,
    pub transaction: Option<String>,
}

/// Who a ceremony step acts for, as far as it is known
#[derive(Debug, Default, Clone)]
pub struct Actor {
    pub user_id: Option<String>,
    pub transaction: Option<String>,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            transaction: None,
        }
    }

    pub fn fail(&self, error: ApiError) -> CeremonyError {
        CeremonyError {
            error,
            user_id: self.user_id.clone(),
            transaction: self.transaction.clone(),
        }
    }
}

pub struct CeremonyCore {
    ctx: TenantContext,
    use_mfa: bool,
    transaction_aware: bool,
}

impl CeremonyCore {
    pub fn new(ctx: TenantContext, use_mfa: bool, transaction_aware: bool) -> Self {
        Self {
            ctx,
            use_mfa,
            transaction_aware,
        }
    }

    pub fn tenant_id(&self) -> &str {
        self.ctx.tenant_id()
    }

    pub fn use_mfa(&self) -> bool {
        self.use_mfa
    }

    /// Session operation an assertion finalize must find
    pub fn assertion_operation(&self) -> Operation {
        if self.transaction_aware {
            Operation::Transaction
        } else {
            Operation::Authentication
        }
    }

    pub fn context(&self) -> &TenantContext {
        &self.ctx
    }

    pub fn webauthn(&self) -> &Webauthn {
        self.ctx.tenant.webauthn()
    }

    pub fn token_generator(&self) -> TokenGenerator<'_> {
        self.ctx.tenant.token_generator()
    }

    /// Step-up ceremonies need the tenant to have MFA enabled.
    pub fn ensure_enabled(&self) -> Result<(), ApiError> {
        if self.use_mfa && !self.ctx.config().mfa.enabled {
            return Err(ApiError::bad_request(
                "step-up authentication is not enabled for this tenant",
            ));
        }
        Ok(())
    }

    /// User verification requested for this ceremony's pool
    pub fn user_verification(&self) -> UserVerification {
        let config = self.ctx.config();
        if self.use_mfa {
            config.mfa.user_verification
        } else {
            config.webauthn.user_verification
        }
    }

    /// Wrap protocol state into a session expiring after the tenant timeout.
    pub fn new_session<S: Serialize>(
        &self,
        challenge: &[u8],
        operation: Operation,
        user_id: Option<Uuid>,
        is_discoverable: bool,
        state: &S,
    ) -> Result<SessionData, ApiError> {
        Ok(SessionData::new(
            self.tenant_id(),
            encode_challenge(challenge),
            operation,
            user_id,
            is_discoverable,
            state,
            self.ctx.config().session_ttl(),
        )?)
    }

    pub async fn user_by_external_id(&self, external_user_id: &str) -> Result<WebauthnUser, ApiError> {
        self.ctx
            .store
            .user_by_external_id(self.tenant_id(), external_user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("user"))
    }

    pub async fn user_by_handle(&self, handle: Uuid) -> Result<Option<WebauthnUser>, ApiError> {
        Ok(self.ctx.store.user_by_id(self.tenant_id(), handle).await?)
    }

    /// All of the user's credentials, both pools.
    pub async fn all_credentials(&self, user_id: Uuid) -> Result<Vec<Credential>, ApiError> {
        Ok(self
            .ctx
            .store
            .credentials_for_user(self.tenant_id(), user_id)
            .await?)
    }

    /// The user with this ceremony's credential pool.
    pub async fn adapter(&self, user: WebauthnUser) -> Result<WebauthnUserAdapter, ApiError> {
        let credentials = self.all_credentials(user.id).await?;
        Ok(WebauthnUserAdapter::new(user, credentials, self.use_mfa))
    }

    /// Look up the session a finalize refers to.
    ///
    /// `discoverable` constrains the session's flag when set. Mismatches are
    /// not deleted. An expired session is discarded.
    pub async fn resolve_session(
        &self,
        challenge: &str,
        operation: Operation,
        discoverable: Option<bool>,
    ) -> Result<SessionData, ApiError> {
        let session = self
            .ctx
            .store
            .session_by_challenge(self.tenant_id(), challenge)
            .await?
            .ok_or_else(|| ApiError::unauthorized(CHALLENGE_MISMATCH))?;

        let flag_matches = discoverable.map_or(true, |d| d == session.is_discoverable);
        if session.operation != operation || !flag_matches {
            tracing::warn!(
                tenant_id = %self.tenant_id(),
                expected = %operation,
                found = %session.operation,
                "Session does not match the finalize route"
            );
            return Err(ApiError::unauthorized(CHALLENGE_MISMATCH));
        }

        if session.is_expired() {
            self.discard_session(&session).await;
            return Err(ApiError::bad_request("session has expired"));
        }

        Ok(session)
    }

    /// Consume a session after a failed finalize.
    pub async fn discard_session(&self, session: &SessionData) {
        match self.ctx.store.delete_session(session).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(session_id = %session.id, "Session already consumed");
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Failed to discard session");
            }
        }
    }

    /// Reject a credential from the other pool before verifying it.
    pub fn check_pool(&self, credentials: &[Credential], credential_id: &str) -> Result<(), ApiError> {
        match credentials.iter().find(|c| c.id == credential_id) {
            Some(c) if c.is_mfa && !self.use_mfa => Err(ApiError::bad_request(
                "step-up credentials cannot be used for this ceremony",
            )),
            Some(c) if !c.is_mfa && self.use_mfa => Err(ApiError::bad_request(
                "credential is not registered for step-up authentication",
            )),
            _ => Ok(()),
        }
    }

    /// Verify an assertion against the user's credentials in this pool.
    ///
    /// Returns the matched credential with the assertion applied.
    pub async fn verify_assertion(
        &self,
        session: &SessionData,
        user: WebauthnUser,
        response: &PublicKeyCredential,
    ) -> Result<Credential, ApiError> {
        let credentials = self.all_credentials(user.id).await?;
        self.check_pool(&credentials, &encode_id(&response.raw_id))?;

        let adapter = WebauthnUserAdapter::new(user, credentials, self.use_mfa);
        let result = if session.is_discoverable {
            let state: DiscoverableAuthentication = session.state()?;
            let keys = adapter.discoverable_keys()?;
            self.webauthn()
                .finish_discoverable_authentication(response, state, &keys)
        } else {
            let state: PasskeyAuthentication = session.state()?;
            self.webauthn()
                .finish_passkey_authentication(response, &state)
        }
        .map_err(assertion_error)?;

        let credential_id = encode_id(result.cred_id());
        let mut credential = adapter
            .find_credential_by_id(&credential_id)
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("failed to validate assertion"))?;
        credential.apply_authentication(&result)?;

        tracing::debug!(
            tenant_id = %self.tenant_id(),
            credential_id = %credential_id,
            counter = result.counter(),
            user_verified = result.user_verified(),
            "Assertion verified"
        );
        Ok(credential)
    }

    /// Claim the session and write the credential.
    pub async fn commit(&self, session: SessionData, credential: CredentialWrite) -> Result<(), ApiError> {
        let creating = matches!(credential, CredentialWrite::Create(_));

        self.ctx
            .store
            .commit_finalize(FinalizeCommit {
                session,
                credential,
            })
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => ApiError::unauthorized(CHALLENGE_MISMATCH),
                StorageError::Conflict(_) if creating => {
                    ApiError::conflict("credential already registered")
                }
                other => other.into(),
            })?;

        self.sweep_expired().await;
        Ok(())
    }

    async fn sweep_expired(&self) {
        match self.ctx.store.delete_expired_sessions(self.tenant_id()).await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(tenant_id = %self.tenant_id(), removed, "Removed expired sessions")
            }
            Err(e) => {
                tracing::warn!(tenant_id = %self.tenant_id(), error = %e, "Expired session sweep failed")
            }
        }
    }
}

#[derive(Deserialize)]
struct ClientData {
    challenge: String,
}

/// Canonical challenge from a response's client data JSON.
pub fn challenge_from_client_data(client_data_json: &[u8]) -> Result<String, ApiError> {
    let data: ClientData = serde_json::from_slice(client_data_json)
        .map_err(|_| ApiError::bad_request("malformed client data"))?;
    let raw = decode_challenge(&data.challenge)
        .map_err(|_| ApiError::bad_request("malformed challenge in client data"))?;
    Ok(encode_challenge(&raw))
}

/// Resolve a user handle to the internal user id.
///
/// Handles are the 16 raw bytes of the UUID. Older registrations carry the
/// UUID's string form, which is still accepted.
pub fn normalize_user_handle(handle: &[u8]) -> Result<Uuid, ApiError> {
    if let Ok(id) = Uuid::from_slice(handle) {
        return Ok(id);
    }
    std::str::from_utf8(handle)
        .ok()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| ApiError::bad_request("malformed user handle"))
}

/// Drop `internal` transport hints from the allowed credentials.
pub fn strip_internal_transports(rcr: &mut RequestChallengeResponse) {
    for credential in rcr.public_key.allow_credentials.iter_mut() {
        if let Some(transports) = credential.transports.as_mut() {
            transports.retain(|t| !matches!(t, AuthenticatorTransport::Internal));
        }
    }
}

/// Stored name of a transport, as it appears in WebAuthn JSON.
pub fn transport_name(transport: &AuthenticatorTransport) -> Option<String> {
    serde_json::to_value(transport)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
}

/// base64url (no padding) form of a credential id
pub fn encode_id(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn attestation_error(e: WebauthnError) -> ApiError {
    match e {
        WebauthnError::UserNotVerified => {
            ApiError::unprocessable("user verification was required but not performed")
        }
        other => {
            tracing::debug!(error = ?other, "Attestation rejected");
            ApiError::bad_request("failed to validate attestation")
        }
    }
}

pub fn assertion_error(e: WebauthnError) -> ApiError {
    tracing::debug!(error = ?e, "Assertion rejected");
    ApiError::unauthorized("failed to validate assertion")
}
