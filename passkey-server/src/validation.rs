//! Request validation module
//!
//! Structural checks on identifiers supplied by tenants before any ceremony
//! work starts.

use crate::db::UserProfile;
use crate::error::ApiError;
use crate::webauthn::TransactionPayload;

/// Max length of a tenant-side user id or transaction identifier
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Max size of the transaction data in bytes (16 KB)
pub const MAX_TRANSACTION_DATA_LEN: usize = 16 * 1024;

fn validate_identifier(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ApiError::bad_request(format!(
            "{} exceeds {} bytes",
            field, MAX_IDENTIFIER_LEN
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(ApiError::bad_request(format!(
            "{} contains control characters",
            field
        )));
    }
    Ok(())
}

/// Validates a tenant-side user id
pub fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    validate_identifier("user_id", user_id)
}

/// Validates the user attributes of a registration request
///
/// `display_name` falls back to `name`, so only `name` is required.
pub fn validate_profile(profile: &UserProfile) -> Result<(), ApiError> {
    validate_user_id(&profile.user_id)?;
    if profile.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    if profile.name.len() > MAX_IDENTIFIER_LEN {
        return Err(ApiError::bad_request(format!(
            "name exceeds {} bytes",
            MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

/// Validates the transaction to be signed
pub fn validate_transaction(transaction: &TransactionPayload) -> Result<(), ApiError> {
    validate_identifier("transaction identifier", &transaction.identifier)?;
    if transaction.data.len() > MAX_TRANSACTION_DATA_LEN {
        let max_kb = MAX_TRANSACTION_DATA_LEN / 1024;
        return Err(ApiError::bad_request(format!(
            "transaction data exceeds {} KB",
            max_kb
        )));
    }
    Ok(())
}
