//! Caller-facing surface of the secure-messaging pipeline.
//!
//! Every operation takes the acting user's id (as established by the
//! caller's authentication) and returns an [`Outcome`]: either the result or
//! an [`ErrorBody`] carrying the machine-readable reason and, where one
//! applies, the recipient a caller should prompt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;
use zeroize::Zeroizing;

use sealpost_core::{
    Error, ErrorCode, KeyAlgorithm, KeyDetail, KeySummary, MailStore, MessageView,
    PeerKeySnapshot, Result, SecureStore, UserDirectory, UserIdentity,
};
use sealpost_crypto::{IntegrityEnvelope, PassphraseHasher, PgpEngine, RpgpEngine, SecureTransform};

use crate::config::SealConfig;
use crate::services::{
    ComposePipeline, ComposeRequest, DecryptedMessage, GenerateKey, KeyStore,
    MessageSecurityBinder, PeerKeyCache, SecureReader, WorkLimits,
};

/// Structured failure returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            recipient: e.recipient().map(str::to_string),
        }
    }
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        Self::from(&e)
    }
}

pub type Outcome<T> = std::result::Result<T, ErrorBody>;

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeResponse {
    pub delivery_id: Uuid,
    /// One id per stored copy; the sender's own copy is last.
    pub message_ids: Vec<Uuid>,
}

/// Key generation request as received from a caller.
pub struct GenerateKeyRequest {
    /// `RSA` or `DSA`, any case.
    pub algorithm: String,
    pub key_size: u32,
    pub expire_days: i64,
    pub passphrase: Zeroizing<String>,
    pub comment: Option<String>,
}

impl std::fmt::Debug for GenerateKeyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateKeyRequest")
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("expire_days", &self.expire_days)
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Received key as shown to its holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedKey {
    pub key_id: String,
    pub peer_id: Uuid,
    pub peer_email: String,
    pub public_key: String,
    pub expire_at: chrono::DateTime<chrono::Utc>,
    pub expired: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PeerKeySnapshot> for ReceivedKey {
    fn from(s: PeerKeySnapshot) -> Self {
        Self {
            expired: PeerKeyCache::is_expired(&s),
            key_id: s.key_id,
            peer_id: s.peer_id,
            peer_email: s.peer_email,
            public_key: s.public_key,
            expire_at: s.expire_at,
            created_at: s.created_at,
        }
    }
}

fn outcome<T>(op: &'static str, result: Result<T>) -> Outcome<T> {
    result.map_err(|e| {
        if e.code() == ErrorCode::Internal {
            error!(
                subsystem = "mail",
                component = "secure_mail",
                op,
                error = %e,
                "Operation failed"
            );
        }
        ErrorBody::from(e)
    })
}

/// The secure-messaging pipeline over one store.
#[derive(Clone)]
pub struct SecureMail {
    users: Arc<dyn UserDirectory>,
    mail: Arc<dyn MailStore>,
    keys: KeyStore,
    peer_keys: PeerKeyCache,
    compose: ComposePipeline,
    reader: SecureReader,
}

impl SecureMail {
    /// Wire the services with the rPGP engine.
    pub fn new<S: SecureStore + 'static>(store: Arc<S>, config: &SealConfig) -> Result<Self> {
        Self::with_engine(store, Arc::new(RpgpEngine::new()), config)
    }

    pub fn with_engine<S: SecureStore + 'static>(
        store: Arc<S>,
        engine: Arc<dyn PgpEngine>,
        config: &SealConfig,
    ) -> Result<Self> {
        let envelope = IntegrityEnvelope::new(config.hmac_secret.to_vec())?;
        let limits = WorkLimits::new(config.keygen_timeout, config.crypto_timeout);
        let transform = SecureTransform::new(engine.clone());

        let keys = KeyStore::new(
            store.clone(),
            engine.clone(),
            PassphraseHasher::new(config.kdf.clone()),
            limits,
        );
        let peer_keys = PeerKeyCache::new(store.clone(), engine, limits);
        let binder = MessageSecurityBinder::new(store.clone(), store.clone(), store.clone());
        let compose = ComposePipeline::new(
            store.clone(),
            store.clone(),
            keys.clone(),
            transform.clone(),
            envelope.clone(),
            limits,
        );
        let reader = SecureReader::new(
            store.clone(),
            keys.clone(),
            binder,
            transform,
            envelope,
            limits,
        );

        Ok(Self {
            users: store.clone(),
            mail: store,
            keys,
            peer_keys,
            compose,
            reader,
        })
    }

    async fn user(&self, user_id: Uuid) -> Result<UserIdentity> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {} not found", user_id)))
    }

    // ─── Messages ─────────────────────────────────────────────────────────

    pub async fn compose(&self, sender_id: Uuid, request: ComposeRequest) -> Outcome<ComposeResponse> {
        let result = async {
            let sender = self.user(sender_id).await?;
            let receipt = self.compose.compose(&sender, request).await?;
            Ok::<_, Error>(ComposeResponse {
                delivery_id: receipt.delivery_id,
                message_ids: receipt.message_ids,
            })
        }
        .await;
        outcome("compose", result)
    }

    pub async fn decrypt(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        passphrase: &str,
    ) -> Outcome<DecryptedMessage> {
        outcome(
            "decrypt",
            self.reader.decrypt(user_id, message_id, passphrase).await,
        )
    }

    /// Stored copy with the body withheld for secured variants.
    pub async fn get_message(&self, user_id: Uuid, message_id: Uuid) -> Outcome<MessageView> {
        let result = self
            .mail
            .get_message(user_id, message_id)
            .await
            .and_then(|m| {
                m.map(|m| m.view())
                    .ok_or_else(|| Error::NotFound(format!("Message {} not found", message_id)))
            });
        outcome("get_message", result)
    }

    pub async fn list_messages(&self, user_id: Uuid) -> Outcome<Vec<MessageView>> {
        let result = self
            .mail
            .list_messages(user_id)
            .await
            .map(|messages| messages.iter().map(|m| m.view()).collect());
        outcome("list_messages", result)
    }

    /// Deleting a copy also deletes its key binding.
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> Outcome<()> {
        let result = match self.mail.delete_message(user_id, message_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::NotFound(format!("Message {} not found", message_id))),
            Err(e) => Err(e),
        };
        outcome("delete_message", result)
    }

    // ─── Own keys ─────────────────────────────────────────────────────────

    pub async fn generate_key(&self, user_id: Uuid, request: GenerateKeyRequest) -> Outcome<KeySummary> {
        let result = async {
            let algorithm: KeyAlgorithm = request
                .algorithm
                .parse()
                .map_err(Error::InvalidParameter)?;
            let user = self.user(user_id).await?;
            let key = self
                .keys
                .generate(
                    &user,
                    GenerateKey {
                        algorithm,
                        key_size: request.key_size,
                        expire_days: request.expire_days,
                        passphrase: request.passphrase,
                        comment: request.comment,
                    },
                )
                .await?;
            Ok::<_, Error>(key.summary())
        }
        .await;
        outcome("generate_key", result)
    }

    pub async fn list_keys(&self, user_id: Uuid) -> Outcome<Vec<KeySummary>> {
        outcome("list_keys", self.keys.list(user_id).await)
    }

    pub async fn get_key(&self, user_id: Uuid, key_id: &str) -> Outcome<KeyDetail> {
        outcome("get_key", self.keys.detail(user_id, key_id).await)
    }

    pub async fn delete_key(&self, user_id: Uuid, key_id: &str) -> Outcome<()> {
        outcome("delete_key", self.keys.delete(user_id, key_id).await)
    }

    pub async fn set_default_key(&self, user_id: Uuid, key_id: &str) -> Outcome<()> {
        outcome("set_default_key", self.keys.set_default(user_id, key_id).await)
    }

    // ─── Received keys ────────────────────────────────────────────────────

    pub async fn list_received_keys(&self, user_id: Uuid) -> Outcome<Vec<ReceivedKey>> {
        let result = self
            .peer_keys
            .list(user_id)
            .await
            .map(|snapshots| snapshots.into_iter().map(ReceivedKey::from).collect());
        outcome("list_received_keys", result)
    }

    pub async fn get_received_key(&self, user_id: Uuid, key_id: &str) -> Outcome<ReceivedKey> {
        let result = self
            .peer_keys
            .get_by_key_id(user_id, key_id)
            .await
            .map(ReceivedKey::from);
        outcome("get_received_key", result)
    }

    pub async fn delete_received_key(&self, user_id: Uuid, key_id: &str) -> Outcome<()> {
        outcome(
            "delete_received_key",
            self.peer_keys.delete(user_id, key_id).await,
        )
    }

    /// Keep a public key received out of band from the user at `peer_email`.
    pub async fn import_received_key(
        &self,
        user_id: Uuid,
        peer_email: &str,
        armored_public: &str,
        expire_days: i64,
    ) -> Outcome<ReceivedKey> {
        let result = async {
            let holder = self.user(user_id).await?;
            let peer = self
                .users
                .find_user_by_email(peer_email)
                .await?
                .ok_or_else(|| Error::RecipientNotFound {
                    recipient: peer_email.trim().to_string(),
                })?;
            let snapshot = self
                .peer_keys
                .import(&holder, &peer, armored_public, expire_days)
                .await?;
            Ok::<_, Error>(ReceivedKey::from(snapshot))
        }
        .await;
        outcome("import_received_key", result)
    }
}
