//! Error types for sealpost.
//!
//! Every failure a caller can observe maps onto a stable [`ErrorCode`], so an
//! HTTP or CLI layer can branch on the reason without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using sealpost's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sealpost operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad algorithm, key size, expiration or other caller input
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A recipient address does not belong to any known user
    #[error("User with email {recipient} does not exist")]
    RecipientNotFound { recipient: String },

    /// The sender listed themselves as a recipient
    #[error("Cannot send a secured message to yourself ({recipient})")]
    SelfRecipientRejected { recipient: String },

    /// No usable key was found
    #[error("Key not found: {detail}")]
    KeyNotFound {
        detail: String,
        recipient: Option<String>,
    },

    /// A recipient's key exists but has expired
    #[error("Key {key_id} for {recipient} has expired")]
    KeyExpired { key_id: String, recipient: String },

    /// Passphrase does not match the stored key
    #[error("Passphrase does not match")]
    AuthenticationFailed,

    /// PGP engine failed to encrypt or sign
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// PGP engine failed to decrypt
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Signature did not verify against the bound sender key
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Integrity tag mismatch after the payload was recovered
    #[error("Integrity check failed - message may have been tampered with")]
    IntegrityCheckFailed,

    /// A secured message has no usable key binding
    #[error("Key binding missing for message {message_id}")]
    BindingMissing { message_id: Uuid },

    /// Bounded work exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidParameter,
    NotFound,
    RecipientNotFound,
    SelfRecipientRejected,
    KeyNotFound,
    KeyExpired,
    AuthenticationFailed,
    EncryptionFailed,
    DecryptionFailed,
    SignatureInvalid,
    IntegrityCheckFailed,
    BindingMissing,
    Timeout,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidParameter => "InvalidParameter",
            Self::NotFound => "NotFound",
            Self::RecipientNotFound => "RecipientNotFound",
            Self::SelfRecipientRejected => "SelfRecipientRejected",
            Self::KeyNotFound => "KeyNotFound",
            Self::KeyExpired => "KeyExpired",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::EncryptionFailed => "EncryptionFailed",
            Self::DecryptionFailed => "DecryptionFailed",
            Self::SignatureInvalid => "SignatureInvalid",
            Self::IntegrityCheckFailed => "IntegrityCheckFailed",
            Self::BindingMissing => "BindingMissing",
            Self::Timeout => "Timeout",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Shorthand for a missing key that is not tied to a recipient.
    pub fn key_not_found(detail: impl Into<String>) -> Self {
        Error::KeyNotFound {
            detail: detail.into(),
            recipient: None,
        }
    }

    /// Missing key for a specific recipient of a compose.
    pub fn recipient_key_not_found(recipient: impl Into<String>) -> Self {
        let recipient = recipient.into();
        Error::KeyNotFound {
            detail: format!("PGP key for user {} not found", recipient),
            recipient: Some(recipient),
        }
    }

    /// The machine-readable reason for this error.
    ///
    /// Infrastructure failures (database, I/O, configuration) collapse into
    /// [`ErrorCode::Internal`].
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::RecipientNotFound { .. } => ErrorCode::RecipientNotFound,
            Error::SelfRecipientRejected { .. } => ErrorCode::SelfRecipientRejected,
            Error::KeyNotFound { .. } => ErrorCode::KeyNotFound,
            Error::KeyExpired { .. } => ErrorCode::KeyExpired,
            Error::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            Error::EncryptionFailed(_) => ErrorCode::EncryptionFailed,
            Error::DecryptionFailed(_) => ErrorCode::DecryptionFailed,
            Error::SignatureInvalid(_) => ErrorCode::SignatureInvalid,
            Error::IntegrityCheckFailed => ErrorCode::IntegrityCheckFailed,
            Error::BindingMissing { .. } => ErrorCode::BindingMissing,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Database(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorCode::Internal,
        }
    }

    /// The recipient a failure refers to, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Error::RecipientNotFound { recipient }
            | Error::SelfRecipientRejected { recipient }
            | Error::KeyExpired { recipient, .. } => Some(recipient),
            Error::KeyNotFound { recipient, .. } => recipient.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
