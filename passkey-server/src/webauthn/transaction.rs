//! Transaction confirmation
//!
//! A targeted login whose challenge is extended with
//! `SHA-256(identifier ++ data)`. The extended challenge is what the
//! authenticator signs, what the session and the transaction row are keyed
//! by, and what the stored protocol state expects back, so a finalize binds
//! to exactly one transaction and any edit of its content breaks the binding.

use webauthn_rs::prelude::*;
use webauthn_rs_proto::UserVerificationPolicy;

use super::ceremony::{
    challenge_from_client_data, strip_internal_transports, Actor, CeremonyCore, CeremonyOutcome,
    CHALLENGE_MISMATCH,
};
use super::types::TransactionPayload;
use crate::db::{Operation, SessionData, Transaction};
use crate::error::{ApiError, CeremonyError};
use crate::storage::{CredentialWrite, StorageError};
use crate::tenant::TenantContext;
use passkey_core::challenge::TRANSACTION_DIGEST_LEN;
use passkey_core::{
    decode_challenge, encode_challenge, extend_challenge, rebind_challenge, transaction_digest,
};

pub struct TransactionCeremony {
    core: CeremonyCore,
}

impl TransactionCeremony {
    pub fn new(ctx: TenantContext) -> Self {
        Self {
            core: CeremonyCore::new(ctx, false, true),
        }
    }

    /// Issue assertion options bound to the transaction.
    pub async fn initialize(
        &self,
        user_id: &str,
        transaction: TransactionPayload,
    ) -> Result<RequestChallengeResponse, CeremonyError> {
        let actor = Actor {
            user_id: Some(user_id.to_string()),
            transaction: Some(transaction.identifier.clone()),
        };
        self.begin(user_id, transaction)
            .await
            .map_err(|e| actor.fail(e))
    }

    async fn begin(
        &self,
        user_id: &str,
        payload: TransactionPayload,
    ) -> Result<RequestChallengeResponse, ApiError> {
        let store = &self.core.context().store;
        let tenant_id = self.core.tenant_id();

        let user = self.core.user_by_external_id(user_id).await?;
        let adapter = self.core.adapter(user).await?;
        if adapter.is_empty() {
            return Err(ApiError::bad_request("user has no registered credentials"));
        }

        if store
            .transaction_by_identifier(tenant_id, &payload.identifier)
            .await?
            .is_some()
        {
            return Err(ApiError::conflict("transaction already exists"));
        }

        let (mut rcr, state) = self
            .core
            .webauthn()
            .start_passkey_authentication(&adapter.passkeys()?)
            .map_err(|e| ApiError::internal(format!("Failed to start authentication: {:?}", e)))?;

        let original: Vec<u8> = rcr.public_key.challenge.clone().into();
        let extended = extend_challenge(&original, &payload.identifier, &payload.data);

        let mut state = serde_json::to_value(&state)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        rebind_challenge(&mut state, &original, &extended)?;
        rcr.public_key.challenge = extended.clone().into();

        let user_verification: UserVerificationPolicy = self.core.user_verification().into();
        rcr.public_key.user_verification = user_verification;
        strip_internal_transports(&mut rcr);

        let challenge = encode_challenge(&extended);
        let session = SessionData::from_value(
            tenant_id,
            challenge.clone(),
            Operation::Transaction,
            Some(adapter.handle()),
            false,
            state,
            self.core.context().config().session_ttl(),
        );
        let transaction = Transaction::new(
            tenant_id,
            adapter.handle(),
            payload.identifier,
            payload.data,
            challenge,
        );

        store
            .save_transaction_session(&transaction, &session)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => ApiError::conflict("transaction already exists"),
                other => other.into(),
            })?;

        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            transaction = %transaction.identifier,
            operation = %Operation::Transaction,
            "Transaction started"
        );
        Ok(rcr)
    }

    /// Verify the assertion over the transaction and mint a bound token.
    pub async fn finalize(
        &self,
        response: PublicKeyCredential,
    ) -> Result<CeremonyOutcome, CeremonyError> {
        let challenge = challenge_from_client_data(&response.response.client_data_json)?;

        let transaction = self
            .core
            .context()
            .store
            .transaction_by_challenge(self.core.tenant_id(), &challenge)
            .await?
            .ok_or_else(|| ApiError::not_found("transaction"))?;

        let mut actor = Actor {
            user_id: None,
            transaction: Some(transaction.identifier.clone()),
        };

        let session = self
            .core
            .resolve_session(&challenge, self.core.assertion_operation(), Some(false))
            .await
            .map_err(|e| actor.fail(e))?;

        match self
            .complete(&session, &transaction, &response, &mut actor)
            .await
        {
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
        transaction: &Transaction,
        response: &PublicKeyCredential,
        actor: &mut Actor,
    ) -> Result<CeremonyOutcome, ApiError> {
        if !digest_matches(&transaction.challenge, transaction) {
            tracing::warn!(
                tenant_id = %self.core.tenant_id(),
                transaction = %transaction.identifier,
                "Stored transaction no longer matches its challenge"
            );
            return Err(ApiError::unauthorized(CHALLENGE_MISMATCH));
        }

        let handle = session
            .user_id
            .filter(|id| *id == transaction.user_id)
            .ok_or_else(|| ApiError::unauthorized(CHALLENGE_MISMATCH))?;
        let user = self
            .core
            .user_by_handle(handle)
            .await?
            .ok_or_else(|| ApiError::not_found("user"))?;
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
            transaction = %transaction.identifier,
            "Transaction confirmed"
        );

        let token = self
            .core
            .token_generator()
            .generate_for_transaction(&external_id, &credential_id, &transaction.identifier)
            .await?;

        Ok(CeremonyOutcome {
            token,
            user_id: external_id,
            transaction: Some(transaction.identifier.clone()),
        })
    }
}

/// Whether the challenge still ends with the digest of the transaction content.
fn digest_matches(challenge: &str, transaction: &Transaction) -> bool {
    let Ok(bytes) = decode_challenge(challenge) else {
        return false;
    };
    bytes.len() > TRANSACTION_DIGEST_LEN
        && bytes[bytes.len() - TRANSACTION_DIGEST_LEN..]
            == transaction_digest(&transaction.identifier, &transaction.data)
}
