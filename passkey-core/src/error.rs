use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("No wrapping secret configured")]
    MissingWrappingSecret,

    #[error("Challenge binding error: {0}")]
    ChallengeBinding(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
