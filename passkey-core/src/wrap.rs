//! Encryption at rest for signing keys.
//!
//! # Algorithms
//!
//! - **Key Derivation**: HKDF-SHA256 over the configured wrapping secret
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! A wrapped blob is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//!
//! # Secret rotation
//!
//! [`KeyWrapper`] holds the configured secrets in order. The first one is the
//! active secret and wraps all new material. Unwrapping tries every secret in
//! order, so an older secret that is still configured keeps decrypting what it
//! wrapped.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CoreError, Result};

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Shortest wrapping secret accepted
pub const MIN_SECRET_LEN: usize = 16;

/// HKDF salt, fixed across tenants
const HKDF_SALT: &[u8] = b"passkey-key-wrapping-salt-v1";

/// HKDF info label for the key encryption key
const HKDF_INFO: &[u8] = b"passkey-jwk-wrapping-v1";

/// A 256-bit key encryption key derived from a wrapping secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey([u8; 32]);

impl WrappingKey {
    /// Derive the key encryption key for a configured secret.
    pub fn derive(secret: &str) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CoreError::InvalidKeyMaterial(format!(
                "wrapping secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CoreError::InvalidKeyMaterial(format!("key derivation failed: {}", e)))?;
        Ok(Self(key))
    }

    /// Encrypt `plaintext` under this key with a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CoreError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a blob produced by [`WrappingKey::seal`].
    ///
    /// Fails if the blob was sealed under another key or has been tampered with.
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() < NONCE_LEN + AUTH_TAG_LEN {
            return Err(CoreError::Decryption(format!(
                "wrapped key too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CoreError::Decryption("authentication tag mismatch".into()))
    }
}

/// Ordered set of wrapping keys; the first is active.
pub struct KeyWrapper {
    keys: Vec<WrappingKey>,
}

impl KeyWrapper {
    /// Build a wrapper from the configured secrets, newest first.
    pub fn new<S: AsRef<str>>(secrets: &[S]) -> Result<Self> {
        if secrets.is_empty() {
            return Err(CoreError::MissingWrappingSecret);
        }

        let keys = secrets
            .iter()
            .map(|secret| WrappingKey::derive(secret.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { keys })
    }

    /// Number of configured secrets.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Encrypt with the active secret.
    pub fn wrap_key(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.keys
            .first()
            .ok_or(CoreError::MissingWrappingSecret)?
            .seal(plaintext)
    }

    /// Decrypt with the first configured secret that authenticates the blob.
    pub fn unwrap_key(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        for key in &self.keys {
            if let Ok(plaintext) = key.open(sealed) {
                return Ok(plaintext);
            }
        }

        Err(CoreError::Decryption(
            "no configured secret decrypts this key".into(),
        ))
    }
}

impl std::fmt::Debug for KeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyWrapper")
            .field("secrets", &self.keys.len())
            .finish()
    }
}
