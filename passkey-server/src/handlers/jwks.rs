//! Public key publication

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};

use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::lookup;

/// Relying services may cache the key set this long
pub const JWKS_CACHE_CONTROL: &str = "public, max-age=600";

/// GET /{tenant_id}/.well-known/jwks.json
///
/// Every stored key of the tenant, so tokens signed before a secret rotation
/// still verify.
#[utoipa::path(
    get,
    path = "/{tenant_id}/.well-known/jwks.json",
    tag = "Keys",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "JSON Web Key Set of the tenant"),
        (status = 404, description = "Unknown tenant"),
        (status = 500, description = "Stored key could not be read")
    )
)]
pub async fn jwks(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = lookup(&state.tenants, &tenant_id)?;
    let keys = tenant.keys.public_keys().await?;

    tracing::debug!(tenant_id = %tenant_id, keys = keys.keys.len(), "Serving JWKS");

    Ok(([(header::CACHE_CONTROL, JWKS_CACHE_CONTROL)], Json(keys)))
}
