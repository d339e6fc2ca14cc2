//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod ceremonies;
pub mod health;
pub mod jwks;

pub use crate::state::AppState;
pub use ceremonies::{
    login_finalize, login_initialize, mfa_login_finalize, mfa_login_initialize,
    mfa_registration_finalize, mfa_registration_initialize, registration_finalize,
    registration_initialize, transaction_finalize, transaction_initialize,
};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use jwks::{jwks, JWKS_CACHE_CONTROL};
