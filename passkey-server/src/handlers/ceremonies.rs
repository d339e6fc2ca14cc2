//! Ceremony endpoints
//!
//! Each tenant gets the same set of routes under `/{tenant_id}`. Initialize
//! returns the WebAuthn options document to hand to `navigator.credentials`;
//! finalize takes the browser's credential JSON and returns a signed token.
//! Every outcome past tenant resolution is audited.

use axum::{
    extract::{Path, State},
    Json,
};
use webauthn_rs::prelude::{
    CreationChallengeResponse, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse,
};

use crate::audit::{AuditEntry, AuditEvent};
use crate::db::UserProfile;
use crate::error::CeremonyError;
use crate::state::AppState;
use crate::validation::{validate_profile, validate_transaction, validate_user_id};
use crate::webauthn::{
    CeremonyOutcome, LoginCeremony, LoginRequest, RegistrationCeremony, TokenResponse,
    TransactionCeremony, TransactionRequest,
};

async fn record_initialize<T>(
    state: &AppState,
    event: AuditEvent,
    tenant_id: &str,
    user_id: Option<String>,
    transaction: Option<String>,
    result: &Result<T, CeremonyError>,
) {
    let mut entry = AuditEntry::new(event, tenant_id);
    match result {
        Ok(_) => {
            entry.user_id = user_id;
            entry.transaction = transaction;
        }
        Err(e) => {
            entry.user_id = e.user_id.clone().or(user_id);
            entry.transaction = e.transaction.clone().or(transaction);
            entry.error = Some(e.error.error_code().to_string());
        }
    }
    state.audit(entry).await;
}

async fn record_finalize(
    state: &AppState,
    event: AuditEvent,
    tenant_id: &str,
    result: &Result<CeremonyOutcome, CeremonyError>,
) {
    let mut entry = AuditEntry::new(event, tenant_id);
    match result {
        Ok(outcome) => {
            entry.user_id = Some(outcome.user_id.clone());
            entry.transaction = outcome.transaction.clone();
        }
        Err(e) => {
            entry.user_id = e.user_id.clone();
            entry.transaction = e.transaction.clone();
            entry.error = Some(e.error.error_code().to_string());
        }
    }
    state.audit(entry).await;
}

fn token(result: Result<CeremonyOutcome, CeremonyError>) -> Result<Json<TokenResponse>, CeremonyError> {
    result.map(|outcome| Json(TokenResponse {
        token: outcome.token,
    }))
}

async fn start_registration(
    state: AppState,
    tenant_id: String,
    profile: UserProfile,
    mfa: bool,
) -> Result<Json<CreationChallengeResponse>, CeremonyError> {
    let ctx = state.tenant_context(&tenant_id)?;
    let event = if mfa {
        AuditEvent::MfaRegistrationInitialize
    } else {
        AuditEvent::RegistrationInitialize
    };
    let user_id = profile.user_id.clone();

    let result = match validate_profile(&profile) {
        Ok(()) => {
            let ceremony = if mfa {
                RegistrationCeremony::mfa(ctx)
            } else {
                RegistrationCeremony::new(ctx)
            };
            ceremony.initialize(profile).await
        }
        Err(e) => Err(e.into()),
    };

    record_initialize(&state, event, &tenant_id, Some(user_id), None, &result).await;
    result.map(Json)
}

async fn finish_registration(
    state: AppState,
    tenant_id: String,
    response: RegisterPublicKeyCredential,
    mfa: bool,
) -> Result<Json<TokenResponse>, CeremonyError> {
    let ctx = state.tenant_context(&tenant_id)?;
    let (event, ceremony) = if mfa {
        (AuditEvent::MfaRegistrationFinalize, RegistrationCeremony::mfa(ctx))
    } else {
        (AuditEvent::RegistrationFinalize, RegistrationCeremony::new(ctx))
    };

    let result = ceremony.finalize(response).await;
    record_finalize(&state, event, &tenant_id, &result).await;
    token(result)
}

async fn start_login(
    state: AppState,
    tenant_id: String,
    request: LoginRequest,
    mfa: bool,
) -> Result<Json<RequestChallengeResponse>, CeremonyError> {
    let ctx = state.tenant_context(&tenant_id)?;
    let event = if mfa {
        AuditEvent::MfaLoginInitialize
    } else {
        AuditEvent::LoginInitialize
    };
    let user_id = request.user_id.clone();

    let valid = match &request.user_id {
        Some(id) => validate_user_id(id),
        None => Ok(()),
    };
    let result = match valid {
        Ok(()) => {
            let ceremony = if mfa {
                LoginCeremony::mfa(ctx)
            } else {
                LoginCeremony::new(ctx)
            };
            ceremony.initialize(request.user_id).await
        }
        Err(e) => Err(e.into()),
    };

    record_initialize(&state, event, &tenant_id, user_id, None, &result).await;
    result.map(Json)
}

async fn finish_login(
    state: AppState,
    tenant_id: String,
    response: PublicKeyCredential,
    mfa: bool,
) -> Result<Json<TokenResponse>, CeremonyError> {
    let ctx = state.tenant_context(&tenant_id)?;
    let (event, ceremony) = if mfa {
        (AuditEvent::MfaLoginFinalize, LoginCeremony::mfa(ctx))
    } else {
        (AuditEvent::LoginFinalize, LoginCeremony::new(ctx))
    };

    let result = ceremony.finalize(response).await;
    record_finalize(&state, event, &tenant_id, &result).await;
    token(result)
}

/// POST /{tenant_id}/registration/initialize
///
/// Creates the user on first registration, updates its display attributes
/// otherwise, and returns creation options for a discoverable passkey.
#[utoipa::path(
    post,
    path = "/{tenant_id}/registration/initialize",
    tag = "Registration",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = UserProfile,
    responses(
        (status = 200, description = "PublicKeyCredentialCreationOptions (JSON)"),
        (status = 400, description = "Invalid user attributes"),
        (status = 404, description = "Unknown tenant"),
        (status = 409, description = "User registered concurrently")
    )
)]
pub async fn registration_initialize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<CreationChallengeResponse>, CeremonyError> {
    start_registration(state, tenant_id, profile, false).await
}

/// POST /{tenant_id}/registration/finalize
#[utoipa::path(
    post,
    path = "/{tenant_id}/registration/finalize",
    tag = "Registration",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body(content_type = "application/json", description = "RegisterPublicKeyCredential from the browser"),
    responses(
        (status = 200, description = "Credential stored", body = TokenResponse),
        (status = 400, description = "Attestation rejected or session expired"),
        (status = 401, description = "Challenge does not match any session"),
        (status = 409, description = "Credential already registered"),
        (status = 422, description = "User was not verified")
    )
)]
pub async fn registration_finalize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(response): Json<RegisterPublicKeyCredential>,
) -> Result<Json<TokenResponse>, CeremonyError> {
    finish_registration(state, tenant_id, response, false).await
}

/// POST /{tenant_id}/login/initialize
///
/// Targeted at `user_id` when given, discoverable otherwise.
#[utoipa::path(
    post,
    path = "/{tenant_id}/login/initialize",
    tag = "Login",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "PublicKeyCredentialRequestOptions (JSON)"),
        (status = 400, description = "User has no eligible credential"),
        (status = 404, description = "Unknown tenant or user")
    )
)]
pub async fn login_initialize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<RequestChallengeResponse>, CeremonyError> {
    start_login(state, tenant_id, request, false).await
}

/// POST /{tenant_id}/login/finalize
#[utoipa::path(
    post,
    path = "/{tenant_id}/login/finalize",
    tag = "Login",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body(content_type = "application/json", description = "PublicKeyCredential from the browser"),
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 400, description = "Credential not eligible or session expired"),
        (status = 401, description = "Challenge or assertion rejected"),
        (status = 404, description = "Unknown tenant or user")
    )
)]
pub async fn login_finalize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(response): Json<PublicKeyCredential>,
) -> Result<Json<TokenResponse>, CeremonyError> {
    finish_login(state, tenant_id, response, false).await
}

/// POST /{tenant_id}/mfa/registration/initialize
///
/// Registers a roaming step-up credential. 400 when the tenant has MFA disabled.
#[utoipa::path(
    post,
    path = "/{tenant_id}/mfa/registration/initialize",
    tag = "MFA",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = UserProfile,
    responses(
        (status = 200, description = "PublicKeyCredentialCreationOptions (JSON)"),
        (status = 400, description = "MFA disabled or invalid user attributes"),
        (status = 404, description = "Unknown tenant")
    )
)]
pub async fn mfa_registration_initialize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<CreationChallengeResponse>, CeremonyError> {
    start_registration(state, tenant_id, profile, true).await
}

/// POST /{tenant_id}/mfa/registration/finalize
#[utoipa::path(
    post,
    path = "/{tenant_id}/mfa/registration/finalize",
    tag = "MFA",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body(content_type = "application/json", description = "RegisterPublicKeyCredential from the browser"),
    responses(
        (status = 200, description = "Step-up credential stored", body = TokenResponse),
        (status = 400, description = "MFA disabled, attestation rejected or session expired"),
        (status = 401, description = "Challenge does not match any session")
    )
)]
pub async fn mfa_registration_finalize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(response): Json<RegisterPublicKeyCredential>,
) -> Result<Json<TokenResponse>, CeremonyError> {
    finish_registration(state, tenant_id, response, true).await
}

/// POST /{tenant_id}/mfa/login/initialize
///
/// Step-up login always names the user.
#[utoipa::path(
    post,
    path = "/{tenant_id}/mfa/login/initialize",
    tag = "MFA",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "PublicKeyCredentialRequestOptions (JSON)"),
        (status = 400, description = "MFA disabled, no user or no step-up credential"),
        (status = 404, description = "Unknown tenant or user")
    )
)]
pub async fn mfa_login_initialize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<RequestChallengeResponse>, CeremonyError> {
    start_login(state, tenant_id, request, true).await
}

/// POST /{tenant_id}/mfa/login/finalize
#[utoipa::path(
    post,
    path = "/{tenant_id}/mfa/login/finalize",
    tag = "MFA",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body(content_type = "application/json", description = "PublicKeyCredential from the browser"),
    responses(
        (status = 200, description = "Step-up verified", body = TokenResponse),
        (status = 400, description = "Credential not eligible or session expired"),
        (status = 401, description = "Challenge or assertion rejected")
    )
)]
pub async fn mfa_login_finalize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(response): Json<PublicKeyCredential>,
) -> Result<Json<TokenResponse>, CeremonyError> {
    finish_login(state, tenant_id, response, true).await
}

/// POST /{tenant_id}/transaction/initialize
///
/// Issues assertion options whose challenge commits to the transaction data.
#[utoipa::path(
    post,
    path = "/{tenant_id}/transaction/initialize",
    tag = "Transaction",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body = TransactionRequest,
    responses(
        (status = 200, description = "PublicKeyCredentialRequestOptions (JSON)"),
        (status = 400, description = "Invalid transaction or no eligible credential"),
        (status = 404, description = "Unknown tenant or user"),
        (status = 409, description = "Transaction identifier already used")
    )
)]
pub async fn transaction_initialize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<TransactionRequest>,
) -> Result<Json<RequestChallengeResponse>, CeremonyError> {
    let ctx = state.tenant_context(&tenant_id)?;
    let user_id = request.user_id.clone();
    let identifier = request.transaction.identifier.clone();

    let valid = validate_user_id(&request.user_id)
        .and_then(|()| validate_transaction(&request.transaction));
    let result = match valid {
        Ok(()) => {
            TransactionCeremony::new(ctx)
                .initialize(&request.user_id, request.transaction)
                .await
        }
        Err(e) => Err(e.into()),
    };

    record_initialize(
        &state,
        AuditEvent::TransactionInitialize,
        &tenant_id,
        Some(user_id),
        Some(identifier),
        &result,
    )
    .await;
    result.map(Json)
}

/// POST /{tenant_id}/transaction/finalize
///
/// The token carries the transaction identifier.
#[utoipa::path(
    post,
    path = "/{tenant_id}/transaction/finalize",
    tag = "Transaction",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body(content_type = "application/json", description = "PublicKeyCredential from the browser"),
    responses(
        (status = 200, description = "Transaction confirmed", body = TokenResponse),
        (status = 400, description = "Credential not eligible or session expired"),
        (status = 401, description = "Challenge, transaction or assertion rejected"),
        (status = 404, description = "Unknown tenant or transaction")
    )
)]
pub async fn transaction_finalize(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(response): Json<PublicKeyCredential>,
) -> Result<Json<TokenResponse>, CeremonyError> {
    let ctx = state.tenant_context(&tenant_id)?;
    let result = TransactionCeremony::new(ctx).finalize(response).await;
    record_finalize(&state, AuditEvent::TransactionFinalize, &tenant_id, &result).await;
    token(result)
}
