//! Mode-driven sealing and opening of framed message bodies.

use std::sync::Arc;

use sealpost_core::SecurityMode;

use crate::engine::PgpEngine;
use crate::error::{CryptoError, CryptoResult};
use crate::passphrase::UnlockedKey;

/// Applies the PGP operations a [`SecurityMode`] calls for.
///
/// `seal` and `open` are inverses for every mode. Plain passes the payload
/// through untouched. The key each mode needs must be supplied, otherwise
/// [`CryptoError::MissingKey`] is returned without calling the engine.
#[derive(Clone)]
pub struct SecureTransform {
    engine: Arc<dyn PgpEngine>,
}

impl std::fmt::Debug for SecureTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureTransform").finish_non_exhaustive()
    }
}

fn require<'a, T: ?Sized>(key: Option<&'a T>, what: &str, mode: SecurityMode) -> CryptoResult<&'a T> {
    key.ok_or_else(|| CryptoError::MissingKey(format!("{} required for {} mode", what, mode)))
}

impl SecureTransform {
    pub fn new(engine: Arc<dyn PgpEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn PgpEngine> {
        &self.engine
    }

    /// Produce the stored body for `envelope`.
    pub fn seal(
        &self,
        mode: SecurityMode,
        envelope: &str,
        recipient_public: Option<&str>,
        signer: Option<&UnlockedKey>,
    ) -> CryptoResult<String> {
        match mode {
            SecurityMode::Plain => Ok(envelope.to_string()),
            SecurityMode::Encrypted => {
                let recipient = require(recipient_public, "recipient public key", mode)?;
                self.engine.encrypt(envelope, recipient)
            }
            SecurityMode::Signed => {
                let signer = require(signer, "sender private key", mode)?;
                self.engine.sign(envelope, signer)
            }
            SecurityMode::EncryptedAndSigned => {
                let recipient = require(recipient_public, "recipient public key", mode)?;
                let signer = require(signer, "sender private key", mode)?;
                self.engine.sign_then_encrypt(envelope, recipient, signer)
            }
        }
    }

    /// Recover the framed envelope from a stored body.
    pub fn open(
        &self,
        mode: SecurityMode,
        payload: &str,
        reader: Option<&UnlockedKey>,
        sender_public: Option<&str>,
    ) -> CryptoResult<String> {
        match mode {
            SecurityMode::Plain => Ok(payload.to_string()),
            SecurityMode::Encrypted => {
                let reader = require(reader, "recipient private key", mode)?;
                self.engine.decrypt(payload, reader)
            }
            SecurityMode::Signed => {
                let sender = require(sender_public, "sender public key", mode)?;
                self.engine.verify(payload, sender)
            }
            SecurityMode::EncryptedAndSigned => {
                let reader = require(reader, "recipient private key", mode)?;
                let sender = require(sender_public, "sender public key", mode)?;
                self.engine.decrypt_and_verify(payload, reader, sender)
            }
        }
    }
}
