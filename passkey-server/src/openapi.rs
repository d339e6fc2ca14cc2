//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 document served at `/api-docs/openapi.json`.

use axum::Json;
use utoipa::OpenApi;

use crate::db::UserProfile;
use crate::handlers::{HealthResponse, ReadyResponse};
use crate::webauthn::types::AttestationFormat;
use crate::webauthn::{LoginRequest, TokenResponse, TransactionPayload, TransactionRequest};

/// Passkey Server - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Passkey Server",
        description = r#"
## Multi-tenant passkey authentication

Every ceremony is a pair of calls under the tenant's path:

1. **Initialize** returns a WebAuthn options document for `navigator.credentials.create()` or `.get()`
2. **Finalize** takes the browser's credential JSON and returns `{"token": "..."}`

Tokens are EdDSA JWS signed with the tenant's key and verifiable against
`/{tenant_id}/.well-known/jwks.json`. Transaction tokens carry the confirmed
transaction identifier.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Registration", description = "Passkey registration"),
        (name = "Login", description = "Passkey login, targeted or discoverable"),
        (name = "MFA", description = "Step-up credentials kept apart from primary passkeys"),
        (name = "Transaction", description = "Transaction confirmation bound into the challenge"),
        (name = "Keys", description = "Token verification keys"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::jwks::jwks,
        crate::handlers::ceremonies::registration_initialize,
        crate::handlers::ceremonies::registration_finalize,
        crate::handlers::ceremonies::login_initialize,
        crate::handlers::ceremonies::login_finalize,
        crate::handlers::ceremonies::mfa_registration_initialize,
        crate::handlers::ceremonies::mfa_registration_finalize,
        crate::handlers::ceremonies::mfa_login_initialize,
        crate::handlers::ceremonies::mfa_login_finalize,
        crate::handlers::ceremonies::transaction_initialize,
        crate::handlers::ceremonies::transaction_finalize,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            UserProfile,
            LoginRequest,
            TransactionRequest,
            TransactionPayload,
            TokenResponse,
            AttestationFormat,
        )
    )
)]
pub struct ApiDoc;

/// GET /api-docs/openapi.json
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_tenant_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/{tenant_id}/registration/initialize",
            "/{tenant_id}/mfa/login/finalize",
            "/{tenant_id}/transaction/finalize",
            "/{tenant_id}/.well-known/jwks.json",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
