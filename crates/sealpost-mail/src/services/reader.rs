//! Incoming messages: resolve the binding, open the payload, check the tag.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use sealpost_core::{Error, MailStore, Result, SecurityMode};
use sealpost_crypto::{IntegrityEnvelope, SecureTransform};

use super::binder::MessageSecurityBinder;
use super::bounded::{run_bounded, WorkLimits};
use super::key_store::KeyStore;

/// A message copy with its body recovered.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    pub message_id: Uuid,
    pub sender_email: String,
    pub subject: String,
    pub body: String,
    pub mode: SecurityMode,
    /// Fingerprint of the sender key whose signature was checked.
    pub verified_by: Option<String>,
}

impl std::fmt::Debug for DecryptedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedMessage")
            .field("message_id", &self.message_id)
            .field("mode", &self.mode)
            .field("verified_by", &self.verified_by)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct SecureReader {
    mail: Arc<dyn MailStore>,
    keys: KeyStore,
    binder: MessageSecurityBinder,
    transform: SecureTransform,
    envelope: IntegrityEnvelope,
    limits: WorkLimits,
}

impl SecureReader {
    pub fn new(
        mail: Arc<dyn MailStore>,
        keys: KeyStore,
        binder: MessageSecurityBinder,
        transform: SecureTransform,
        envelope: IntegrityEnvelope,
        limits: WorkLimits,
    ) -> Self {
        Self {
            mail,
            keys,
            binder,
            transform,
            envelope,
            limits,
        }
    }

    /// Recover the body of `message_id` for its owner `user_id`.
    ///
    /// `passphrase` unlocks the key the copy was encrypted to and is ignored
    /// for copies that are only signed or plain.
    pub async fn decrypt(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        passphrase: &str,
    ) -> Result<DecryptedMessage> {
        let start = Instant::now();
        let result = self.run(user_id, message_id, passphrase).await;

        match &result {
            Ok(message) => info!(
                subsystem = "reader",
                component = "reader",
                op = "decrypt",
                user_id = %user_id,
                message_id = %message_id,
                security_mode = %message.mode,
                duration_ms = start.elapsed().as_millis() as u64,
                "Message opened"
            ),
            Err(e) => warn!(
                subsystem = "reader",
                component = "reader",
                op = "decrypt",
                user_id = %user_id,
                message_id = %message_id,
                error_code = %e.code(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Decrypt rejected"
            ),
        }
        result
    }

    async fn run(&self, user_id: Uuid, message_id: Uuid, passphrase: &str) -> Result<DecryptedMessage> {
        let message = self
            .mail
            .get_message(user_id, message_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Message {} not found", message_id)))?;

        if message.mode == SecurityMode::Plain {
            return Ok(DecryptedMessage {
                message_id: message.id,
                sender_email: message.sender_email,
                subject: message.subject,
                body: message.body,
                mode: message.mode,
                verified_by: None,
            });
        }

        let resolved = self.binder.resolve(user_id, &message).await?;

        let unlocked = match &resolved.recipient_key {
            Some(key) => Some(self.keys.unlock(key, passphrase).await?),
            None => None,
        };
        let sender_public = resolved.sender_key.as_ref().map(|s| s.public_key.clone());

        let transform = self.transform.clone();
        let mode = message.mode;
        let payload = message.body.clone();
        let frame = run_bounded("open", self.limits.crypto, move || {
            transform
                .open(mode, &payload, unlocked.as_ref(), sender_public.as_deref())
                .map(Zeroizing::new)
        })
        .await?;

        let unwrapped = self.envelope.unwrap(&frame);
        if !unwrapped.tag_ok {
            return Err(Error::IntegrityCheckFailed);
        }

        Ok(DecryptedMessage {
            message_id: message.id,
            sender_email: message.sender_email,
            subject: message.subject,
            body: unwrapped.plaintext,
            mode,
            verified_by: resolved.sender_key.map(|s| s.key_id),
        })
    }
}
