//! Error types for cryptographic operations.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Caller supplied an unsupported algorithm, size or empty input.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Passphrase hashing failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Passphrase does not match the stored hash.
    #[error("Passphrase does not match")]
    AuthenticationFailed,

    /// The engine could not generate a key.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Armored key could not be parsed or failed its self-signature.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption or signing failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed - wrong key or corrupted data.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Signature does not verify against the given key.
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Integrity tag mismatch - data may be tampered.
    #[error("Integrity check failed - data may be tampered")]
    IntegrityCheckFailed,

    /// A key the requested mode needs was not supplied.
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for sealpost_core::Error {
    fn from(e: CryptoError) -> Self {
        use sealpost_core::Error;
        match e {
            CryptoError::InvalidParameter(msg) | CryptoError::InvalidKey(msg) => {
                Error::InvalidParameter(msg)
            }
            CryptoError::AuthenticationFailed => Error::AuthenticationFailed,
            CryptoError::Encryption(msg) => Error::EncryptionFailed(msg),
            CryptoError::Decryption(msg) => Error::DecryptionFailed(msg),
            CryptoError::SignatureInvalid(msg) => Error::SignatureInvalid(msg),
            CryptoError::IntegrityCheckFailed => Error::IntegrityCheckFailed,
            CryptoError::KeyDerivation(msg)
            | CryptoError::KeyGeneration(msg)
            | CryptoError::MissingKey(msg) => Error::Internal(msg),
            CryptoError::Io(e) => Error::Io(e),
            CryptoError::Json(e) => Error::Serialization(e.to_string()),
        }
    }
}
