//! Token signing keys.
//!
//! Every tenant signs its tokens with Ed25519 (`alg = EdDSA`). A key is carried
//! around as a [`SigningKeyPair`], which knows its key id and can be:
//!
//! - serialized to bytes for wrapping at rest ([`SigningKeyPair::to_bytes`])
//! - turned into a `jsonwebtoken` encoding key for signing
//! - reduced to its public half as a JWK for publication

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, Jwk, KeyAlgorithm,
    OctetKeyPairParameters, OctetKeyPairType, PublicKeyUse,
};
use jsonwebtoken::EncodingKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CoreError, Result};

/// Ed25519 private key seed length (32 bytes)
pub const ED25519_SEED_LEN: usize = 32;

/// JOSE algorithm name for every key produced here
pub const SIGNING_ALGORITHM: &str = "EdDSA";

/// Serialized form of a signing key, the plaintext that gets wrapped.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SerializedKey {
    kid: String,
    alg: String,
    /// base64url private key seed
    d: String,
}

/// An Ed25519 signing key together with its key id.
pub struct SigningKeyPair {
    kid: String,
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a fresh key pair from the OS random number generator.
    pub fn generate(kid: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Key id, published as `kid` in the JWK and in token headers.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Serialize the key for encryption at rest.
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        let serialized = SerializedKey {
            kid: self.kid.clone(),
            alg: SIGNING_ALGORITHM.to_string(),
            d: URL_SAFE_NO_PAD.encode(seed.as_slice()),
        };

        serde_json::to_vec(&serialized)
            .map(Zeroizing::new)
            .map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Parse a key previously produced by [`SigningKeyPair::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let serialized: SerializedKey = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::InvalidKeyMaterial(format!("malformed key: {e}")))?;

        if serialized.alg != SIGNING_ALGORITHM {
            return Err(CoreError::InvalidKeyMaterial(format!(
                "unsupported key algorithm '{}'",
                serialized.alg
            )));
        }

        let seed = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(&serialized.d)
                .map_err(|e| CoreError::InvalidKeyMaterial(format!("invalid seed: {e}")))?,
        );

        if seed.len() != ED25519_SEED_LEN {
            return Err(CoreError::InvalidKeyMaterial(format!(
                "invalid seed length: expected {}, got {}",
                ED25519_SEED_LEN,
                seed.len()
            )));
        }

        let mut seed_bytes = Zeroizing::new([0u8; ED25519_SEED_LEN]);
        seed_bytes.copy_from_slice(&seed);

        Ok(Self {
            kid: serialized.kid.clone(),
            signing_key: SigningKey::from_bytes(&seed_bytes),
        })
    }

    /// Encoding key for `jsonwebtoken::encode`.
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        let der = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| CoreError::InvalidKeyMaterial(format!("PKCS#8 encoding failed: {e}")))?;

        Ok(EncodingKey::from_ed_der(der.as_bytes()))
    }

    /// Public half of the key as a JWK (`kty = OKP`, `crv = Ed25519`).
    pub fn public_jwk(&self) -> Jwk {
        let verifying_key = self.signing_key.verifying_key();

        Jwk {
            common: CommonParameters {
                public_key_use: Some(PublicKeyUse::Signature),
                key_algorithm: Some(KeyAlgorithm::EdDSA),
                key_id: Some(self.kid.clone()),
                ..Default::default()
            },
            algorithm: AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters {
                key_type: OctetKeyPairType::OctetKeyPair,
                curve: EllipticCurve::Ed25519,
                x: URL_SAFE_NO_PAD.encode(verifying_key.as_bytes()),
            }),
        }
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, Header, Validation};

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: u64,
    }

    #[test]
    fn test_serialization_preserves_key() {
        let key = SigningKeyPair::generate("kid-1");
        let bytes = key.to_bytes().unwrap();
        let restored = SigningKeyPair::from_bytes(&bytes).unwrap();

        assert_eq!(restored.kid(), "kid-1");
        assert_eq!(
            serde_json::to_value(restored.public_jwk()).unwrap(),
            serde_json::to_value(key.public_jwk()).unwrap()
        );
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(SigningKeyPair::from_bytes(b"not json").is_err());

        let wrong_alg = br#"{"kid":"k","alg":"RS256","d":"AAAA"}"#;
        assert!(matches!(
            SigningKeyPair::from_bytes(wrong_alg),
            Err(CoreError::InvalidKeyMaterial(_))
        ));

        let short_seed = br#"{"kid":"k","alg":"EdDSA","d":"AAAA"}"#;
        assert!(SigningKeyPair::from_bytes(short_seed).is_err());
    }

    #[test]
    fn test_public_jwk_shape() {
        let key = SigningKeyPair::generate("kid-2");
        let json = serde_json::to_value(key.public_jwk()).unwrap();

        assert_eq!(json["kty"], "OKP");
        assert_eq!(json["crv"], "Ed25519");
        assert_eq!(json["kid"], "kid-2");
        assert_eq!(json["use"], "sig");
        assert!(json.get("d").is_none(), "private seed must never be published");
    }

    #[test]
    fn test_signature_verifies_with_public_jwk() {
        let key = SigningKeyPair::generate("kid-3");
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key.kid().to_string());

        let claims = Claims {
            sub: "alice".to_string(),
            exp: 4_102_444_800,
        };
        let token = encode(&header, &claims, &key.encoding_key().unwrap()).unwrap();

        let decoding_key = DecodingKey::from_jwk(&key.public_jwk()).unwrap();
        let decoded =
            decode::<Claims>(&token, &decoding_key, &Validation::new(Algorithm::EdDSA)).unwrap();
        assert_eq!(decoded.claims.sub, "alice");

        let other = SigningKeyPair::generate("kid-3");
        let other_key = DecodingKey::from_jwk(&other.public_jwk()).unwrap();
        assert!(decode::<Claims>(&token, &other_key, &Validation::new(Algorithm::EdDSA)).is_err());
    }
}
