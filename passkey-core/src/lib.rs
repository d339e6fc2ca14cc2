//! Passkey Core - key material primitives for the passkey server
//!
//! This crate holds the pieces of the server that are pure cryptography and
//! carry no I/O:
//!
//! - Ed25519 token signing keys and their public JWKs ([`keys`])
//! - Encryption at rest of serialized keys under rotating secrets ([`wrap`])
//! - Transaction challenge binding ([`challenge`])
//!
//! # Example
//!
//! ```
//! use passkey_core::{KeyWrapper, SigningKeyPair};
//!
//! # fn example() -> passkey_core::Result<()> {
//! let wrapper = KeyWrapper::new(&["a-long-enough-wrapping-secret"])?;
//! let key = SigningKeyPair::generate("key-1");
//!
//! let wrapped = wrapper.wrap_key(&key.to_bytes()?)?;
//! let restored = SigningKeyPair::from_bytes(&wrapper.unwrap_key(&wrapped)?)?;
//! assert_eq!(restored.kid(), "key-1");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod challenge;
pub mod error;
pub mod keys;
pub mod wrap;

pub use challenge::{
    decode_challenge, encode_challenge, extend_challenge, rebind_challenge, transaction_digest,
};
pub use error::{CoreError, Result};
pub use keys::{SigningKeyPair, SIGNING_ALGORITHM};
pub use wrap::{KeyWrapper, WrappingKey};
