//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header, Method, StatusCode},
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::{
    health, jwks, login_finalize, login_initialize, mfa_login_finalize, mfa_login_initialize,
    mfa_registration_finalize, mfa_registration_initialize, ready, registration_finalize,
    registration_initialize, transaction_finalize, transaction_initialize,
};
use crate::openapi::openapi_json;
use crate::state::AppState;

/// Router construction errors
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid rate limit settings: {per_sec} req/s, burst {burst}")]
    RateLimit { per_sec: u64, burst: u32 },
}

/// Create the application router with default config (for testing)
pub fn create_router(state: AppState) -> Result<Router, RouterError> {
    create_router_with_config(state, &Config::default())
}

/// Ceremony and key routes, all scoped by tenant
fn tenant_routes() -> Router<AppState> {
    Router::new()
        .route("/{tenant_id}/registration/initialize", post(registration_initialize))
        .route("/{tenant_id}/registration/finalize", post(registration_finalize))
        .route("/{tenant_id}/login/initialize", post(login_initialize))
        .route("/{tenant_id}/login/finalize", post(login_finalize))
        .route(
            "/{tenant_id}/mfa/registration/initialize",
            post(mfa_registration_initialize),
        )
        .route(
            "/{tenant_id}/mfa/registration/finalize",
            post(mfa_registration_finalize),
        )
        .route("/{tenant_id}/mfa/login/initialize", post(mfa_login_initialize))
        .route("/{tenant_id}/mfa/login/finalize", post(mfa_login_finalize))
        .route("/{tenant_id}/transaction/initialize", post(transaction_initialize))
        .route("/{tenant_id}/transaction/finalize", post(transaction_finalize))
        .route("/{tenant_id}/.well-known/jwks.json", get(jwks))
}

/// Create the application router with custom configuration
///
/// Fails when rate limiting is enabled with a zero rate or burst.
pub fn create_router_with_config(state: AppState, config: &Config) -> Result<Router, RouterError> {
    // Configure CORS based on allowed_origins
    let cors = match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        }
        _ => {
            tracing::warn!("CORS: Allowing all origins (dev mode)");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    // Request body limit
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_kb * 1024);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    // Base router with common layers
    let router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(tenant_routes())
        .with_state(state)
        .layer(cors)
        .layer(body_limit)
        .layer(timeout);

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    if !config.rate_limit_enabled {
        tracing::warn!("Rate limiting: DISABLED");
        return Ok(router.layer(TraceLayer::new_for_http()));
    }

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_sec)
        .burst_size(config.rate_limit_burst)
        .finish()
        .ok_or(RouterError::RateLimit {
            per_sec: config.rate_limit_per_sec,
            burst: config.rate_limit_burst,
        })?;

    tracing::info!(
        "Rate limiting: {} req/s (burst: {})",
        config.rate_limit_per_sec,
        config.rate_limit_burst
    );
    Ok(router
        .layer(GovernorLayer::new(Arc::new(governor_conf)))
        .layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Persister};
    use crate::tenant::TenantDirectory;

    fn state() -> AppState {
        let store: Arc<dyn Persister> = Arc::new(MemoryStore::new());
        AppState::new(TenantDirectory::default(), store)
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let config = Config {
            rate_limit_enabled: true,
            rate_limit_burst: 0,
            ..Config::default()
        };
        assert!(matches!(
            create_router_with_config(state(), &config),
            Err(RouterError::RateLimit { burst: 0, .. })
        ));

        let config = Config {
            rate_limit_enabled: true,
            rate_limit_per_sec: 0,
            ..Config::default()
        };
        assert!(create_router_with_config(state(), &config).is_err());
    }

    #[test]
    fn test_rate_limited_router_builds() {
        let config = Config {
            rate_limit_enabled: true,
            ..Config::default()
        };
        assert!(create_router_with_config(state(), &config).is_ok());
    }
}
