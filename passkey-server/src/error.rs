//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants,
//! plus [`CeremonyError`], which additionally carries the actor a failed ceremony
//! step was attributed to.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use passkey_core::CoreError;
use thiserror::Error;

use crate::storage::StorageError;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - ceremony response could not be matched or verified
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not found - requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict - resource already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unprocessable - well-formed response that fails a policy check
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Key material error from the core library
    #[error("Crypto error: {0}")]
    Crypto(#[from] CoreError),

    /// Persistence layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an unprocessable error
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Key problems are always ours, never the caller's
            Self::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(ref e) => match e {
                StorageError::Conflict(_) => StatusCode::CONFLICT,
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
                StorageError::Migration(_)
                | StorageError::Query(_)
                | StorageError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Unprocessable(_) => "UNPROCESSABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Crypto(ref e) => match e {
                CoreError::Signing(_) => "SIGNING_ERROR",
                CoreError::Encryption(_) | CoreError::Decryption(_) => "KEY_WRAPPING_ERROR",
                CoreError::InvalidKeyMaterial(_) | CoreError::MissingWrappingSecret => {
                    "KEY_MATERIAL_ERROR"
                }
                CoreError::SerializationError(_) => "SERIALIZATION_ERROR",
                CoreError::ChallengeBinding(_) => "CHALLENGE_BINDING_ERROR",
            },
            Self::Storage(ref e) => match e {
                StorageError::Conflict(_) => "CONFLICT",
                StorageError::NotFound(_) => "NOT_FOUND",
                StorageError::Connection(_) => "STORAGE_UNAVAILABLE",
                _ => "STORAGE_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Crypto(_) => "Key operation failed".to_string(),
            Self::Storage(ref e) => match e {
                StorageError::Conflict(what) => format!("Conflict: {}", what),
                StorageError::NotFound(what) => format!("Not found: {}", what),
                StorageError::Connection(_) => "Storage unavailable".to_string(),
                _ => "Storage operation failed".to_string(),
            },
            Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unprocessable(_) => "unprocessable",
            Self::Internal(_) => "internal",
            Self::Crypto(_) => "crypto",
            Self::Storage(_) => "storage",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Authentication error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

/// A failed ceremony step together with the actor it was attributed to.
///
/// `user_id` is the external user id once the ceremony has resolved a user,
/// `transaction` the transaction identifier once a transaction has been resolved.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CeremonyError {
    #[source]
    pub error: ApiError,
    pub user_id: Option<String>,
    pub transaction: Option<String>,
}

impl CeremonyError {
    pub fn new(error: ApiError) -> Self {
        Self {
            error,
            user_id: None,
            transaction: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.status_code()
    }
}

impl From<ApiError> for CeremonyError {
    fn from(error: ApiError) -> Self {
        Self::new(error)
    }
}

impl From<StorageError> for CeremonyError {
    fn from(error: StorageError) -> Self {
        Self::new(error.into())
    }
}

impl From<CoreError> for CeremonyError {
    fn from(error: CoreError) -> Self {
        Self::new(error.into())
    }
}

impl IntoResponse for CeremonyError {
    fn into_response(self) -> Response {
        self.error.into_response()
    }
}
