//! WebAuthn ceremonies
//!
//! ## Architecture
//!
//! - `config`: Relying Party configuration, one protocol instance per tenant
//! - `ceremony`: the shared finalize contract and session handling
//! - `registration`, `login`, `transaction`: the ceremony variants
//! - `adapter`: user and credential pool in the protocol library's shape
//! - `attestation`: credential metadata read from attestation objects
//! - `types`: request/response types for the HTTP API

pub mod adapter;
pub mod attestation;
pub mod ceremony;
pub mod config;
pub mod login;
pub mod registration;
pub mod transaction;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use ceremony::{CeremonyCore, CeremonyOutcome};
pub use config::{UserVerification, WebAuthnConfig, WebauthnSettings};
pub use login::LoginCeremony;
pub use registration::RegistrationCeremony;
pub use transaction::TransactionCeremony;
pub use types::{LoginRequest, TokenResponse, TransactionPayload, TransactionRequest};
