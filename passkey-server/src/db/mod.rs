//! Database module for the passkey server
//!
//! Contains the persisted entities. Storage backends live in [`crate::storage`].

pub mod credential;
pub mod jwk;
pub mod session;
pub mod transaction;
pub mod user;

pub use credential::{Credential, NewCredential};
pub use jwk::JwkRecord;
pub use session::{Operation, SessionData};
pub use transaction::Transaction;
pub use user::{UserProfile, WebauthnUser};
