//! User/credential adapter
//!
//! Presents a stored user and one pool of their credentials in the shape
//! webauthn-rs works with. The pool is chosen once, at construction: an MFA
//! adapter sees only step-up credentials, any other adapter only primary
//! ones.

use uuid::Uuid;
use webauthn_rs::prelude::{CredentialID, DiscoverableKey, Passkey};

use crate::db::{Credential, WebauthnUser};
use crate::storage::StorageError;

pub struct WebauthnUserAdapter {
    user: WebauthnUser,
    credentials: Vec<Credential>,
}

impl WebauthnUserAdapter {
    /// Keep only the credentials whose `is_mfa` equals `use_mfa`.
    pub fn new(user: WebauthnUser, credentials: Vec<Credential>, use_mfa: bool) -> Self {
        let credentials = credentials
            .into_iter()
            .filter(|c| c.is_mfa == use_mfa)
            .collect();
        Self { user, credentials }
    }

    pub fn user(&self) -> &WebauthnUser {
        &self.user
    }

    /// The WebAuthn user handle
    pub fn handle(&self) -> Uuid {
        self.user.id
    }

    pub fn name(&self) -> &str {
        &self.user.name
    }

    pub fn display_name(&self) -> &str {
        &self.user.display_name
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn passkeys(&self) -> Result<Vec<Passkey>, StorageError> {
        self.credentials.iter().map(Credential::passkey).collect()
    }

    pub fn discoverable_keys(&self) -> Result<Vec<DiscoverableKey>, StorageError> {
        Ok(self.passkeys()?.iter().map(DiscoverableKey::from).collect())
    }

    /// Credential ids to exclude when registering another one in this pool.
    pub fn exclude_ids(&self) -> Result<Vec<CredentialID>, StorageError> {
        Ok(self
            .passkeys()?
            .iter()
            .map(|passkey| passkey.cred_id().clone())
            .collect())
    }

    /// Credential in this pool with the given base64url id.
    pub fn find_credential_by_id(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }
}
