//! Outgoing messages.
//!
//! Compose runs straight through: resolve recipients, reject the sender
//! among them, unlock the signing key, then for each recipient check and
//! snapshot keys, seal the framed body and plan its binding. Nothing is
//! written until every recipient has succeeded; the whole delivery is then
//! committed in one store transaction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sealpost_core::{
    new_v7, AsymmetricKey, DeliveryPlan, DeliveryReceipt, Error, MailStore, NewMessage,
    PlannedCopy, Result, SecurityMode, UserDirectory, UserIdentity,
};
use sealpost_crypto::{IntegrityEnvelope, SecureTransform};

use super::binder::MessageSecurityBinder;
use super::bounded::{run_bounded, WorkLimits};
use super::key_store::KeyStore;
use super::peer_key_cache::PeerKeyCache;

/// An outgoing message.
pub struct ComposeRequest {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub encrypt: bool,
    pub sign: bool,
    /// Passphrase of the sender's default key; only consulted when signing.
    pub passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for ComposeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeRequest")
            .field("recipients", &self.recipients)
            .field("encrypt", &self.encrypt)
            .field("sign", &self.sign)
            .finish_non_exhaustive()
    }
}

impl ComposeRequest {
    pub fn mode(&self) -> SecurityMode {
        SecurityMode::from_flags(self.encrypt, self.sign)
    }
}

/// Split a comma separated address list, dropping blanks.
pub fn parse_recipients(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct ComposePipeline {
    users: Arc<dyn UserDirectory>,
    mail: Arc<dyn MailStore>,
    keys: KeyStore,
    transform: SecureTransform,
    envelope: IntegrityEnvelope,
    limits: WorkLimits,
}

impl ComposePipeline {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        mail: Arc<dyn MailStore>,
        keys: KeyStore,
        transform: SecureTransform,
        envelope: IntegrityEnvelope,
        limits: WorkLimits,
    ) -> Self {
        Self {
            users,
            mail,
            keys,
            transform,
            envelope,
            limits,
        }
    }

    /// Distinct recipients in request order. Unknown addresses and the
    /// sender's own address are rejected.
    async fn resolve_recipients(
        &self,
        sender: &UserIdentity,
        addresses: &[String],
    ) -> Result<Vec<UserIdentity>> {
        if addresses.is_empty() {
            return Err(Error::InvalidParameter(
                "At least one recipient required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut recipients = Vec::with_capacity(addresses.len());
        for address in addresses {
            let address = address.trim();
            let user = self
                .users
                .find_user_by_email(address)
                .await?
                .ok_or_else(|| Error::RecipientNotFound {
                    recipient: address.to_string(),
                })?;
            if user.id == sender.id {
                return Err(Error::SelfRecipientRejected {
                    recipient: address.to_string(),
                });
            }
            if seen.insert(user.id) {
                recipients.push(user);
            }
        }
        Ok(recipients)
    }

    /// The recipient's current default key, usable for encryption now.
    async fn encryption_key(&self, recipient: &UserIdentity) -> Result<AsymmetricKey> {
        let key = match self.keys.get_default(recipient.id).await {
            Ok(key) => key,
            Err(Error::KeyNotFound { .. }) => {
                return Err(Error::recipient_key_not_found(&recipient.email))
            }
            Err(e) => return Err(e),
        };
        if KeyStore::is_expired(&key) {
            return Err(Error::KeyExpired {
                key_id: key.key_id,
                recipient: recipient.email.clone(),
            });
        }
        if !key.capabilities.encrypt {
            return Err(Error::KeyNotFound {
                detail: format!(
                    "Default key {} of {} cannot encrypt",
                    key.key_id, recipient.email
                ),
                recipient: Some(recipient.email.clone()),
            });
        }
        Ok(key)
    }

    /// The sender's default key, usable for signing now.
    async fn signing_key(&self, sender: &UserIdentity) -> Result<AsymmetricKey> {
        let key = self.keys.get_default(sender.id).await?;
        if KeyStore::is_expired(&key) {
            return Err(Error::KeyExpired {
                key_id: key.key_id,
                recipient: sender.email.clone(),
            });
        }
        if !key.capabilities.sign {
            return Err(Error::key_not_found(format!(
                "Default key {} cannot sign",
                key.key_id
            )));
        }
        Ok(key)
    }

    /// Send `request` from `sender`. Either every copy is stored or none is.
    pub async fn compose(
        &self,
        sender: &UserIdentity,
        request: ComposeRequest,
    ) -> Result<DeliveryReceipt> {
        let start = Instant::now();
        let result = self.run(sender, request).await;

        match &result {
            Ok(receipt) => info!(
                subsystem = "compose",
                component = "pipeline",
                op = "compose",
                user_id = %sender.id,
                delivery_id = %receipt.delivery_id,
                result_count = receipt.message_ids.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Message sent"
            ),
            Err(e) => warn!(
                subsystem = "compose",
                component = "pipeline",
                op = "compose",
                user_id = %sender.id,
                error_code = %e.code(),
                recipient = e.recipient().unwrap_or("-"),
                duration_ms = start.elapsed().as_millis() as u64,
                "Compose rejected"
            ),
        }
        result
    }

    async fn run(&self, sender: &UserIdentity, request: ComposeRequest) -> Result<DeliveryReceipt> {
        let mode = request.mode();
        let recipients = self.resolve_recipients(sender, &request.recipients).await?;
        debug!(
            subsystem = "compose",
            component = "pipeline",
            op = "compose",
            user_id = %sender.id,
            security_mode = %mode,
            recipient_count = recipients.len(),
            "Recipients resolved"
        );

        let signer = if mode.is_signed() {
            let key = self.signing_key(sender).await?;
            let unlocked = self.keys.unlock(&key, &request.passphrase).await?;
            Some((key, Arc::new(unlocked)))
        } else {
            None
        };

        let frame = if mode.is_secured() {
            Arc::new(self.envelope.wrap(&request.body)?)
        } else {
            Arc::new(request.body.clone())
        };

        let addresses: Vec<String> = recipients.iter().map(|r| r.email.clone()).collect();
        let mut snapshots = Vec::new();
        let mut copies = Vec::with_capacity(recipients.len() + 1);

        for recipient in &recipients {
            let recipient_snapshot = if mode.is_encrypted() {
                let key = self.encryption_key(recipient).await?;
                Some(PeerKeyCache::plan(sender.id, recipient, &key))
            } else {
                None
            };
            let sender_snapshot = signer
                .as_ref()
                .map(|(key, _)| PeerKeyCache::plan(recipient.id, sender, key));

            let transform = self.transform.clone();
            let frame = frame.clone();
            let recipient_public = recipient_snapshot.as_ref().map(|s| s.public_key.clone());
            let unlocked = signer.as_ref().map(|(_, u)| u.clone());
            let body = run_bounded("seal", self.limits.crypto, move || {
                transform.seal(
                    mode,
                    &frame,
                    recipient_public.as_deref(),
                    unlocked.as_deref(),
                )
            })
            .await
            .map_err(|e| match e {
                Error::EncryptionFailed(detail) => Error::EncryptionFailed(format!(
                    "Failed to secure message for {}: {}",
                    recipient.email, detail
                )),
                other => other,
            })?;

            let binding = MessageSecurityBinder::bind(
                mode,
                recipient_snapshot.as_ref(),
                sender_snapshot.as_ref(),
            );
            copies.push(PlannedCopy {
                message: NewMessage {
                    owner_id: recipient.id,
                    sender_id: sender.id,
                    sender_email: sender.email.clone(),
                    recipients: addresses.clone(),
                    subject: request.subject.clone(),
                    body,
                    mode,
                    read: false,
                },
                binding,
            });
            snapshots.extend(recipient_snapshot);
            snapshots.extend(sender_snapshot);
        }

        // The sender's own copy is kept readable without any key.
        copies.push(PlannedCopy {
            message: NewMessage {
                owner_id: sender.id,
                sender_id: sender.id,
                sender_email: sender.email.clone(),
                recipients: addresses,
                subject: request.subject,
                body: request.body,
                mode: SecurityMode::Plain,
                read: true,
            },
            binding: None,
        });

        self.mail
            .commit_delivery(DeliveryPlan {
                delivery_id: new_v7(),
                snapshots,
                copies,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipients() {
        assert_eq!(
            parse_recipients(" a@x.com, b@x.com ,,"),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
        assert!(parse_recipients(" , ").is_empty());
    }

    #[test]
    fn test_request_mode_and_debug() {
        let request = ComposeRequest {
            recipients: vec!["b@x.com".to_string()],
            subject: "secret subject".to_string(),
            body: "secret body".to_string(),
            encrypt: true,
            sign: true,
            passphrase: Zeroizing::new("hunter2".to_string()),
        };
        assert_eq!(request.mode(), SecurityMode::EncryptedAndSigned);
        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("secret body"));
    }
}
