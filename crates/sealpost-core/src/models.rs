//! Core data models for sealpost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::{DSA_MAX_KEY_SIZE, KEY_SIZES, RSA_MIN_KEY_SIZE};

// =============================================================================
// USERS
// =============================================================================

/// A user as seen by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl UserIdentity {
    /// "First Last", trimmed when either part is empty.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// OpenPGP user id: `Name (comment) <email>`.
    pub fn pgp_user_id(&self, comment: Option<&str>) -> String {
        let mut uid = self.display_name();
        if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
            if !uid.is_empty() {
                uid.push(' ');
            }
            uid.push('(');
            uid.push_str(comment);
            uid.push(')');
        }
        if !uid.is_empty() {
            uid.push(' ');
        }
        uid.push('<');
        uid.push_str(&self.email);
        uid.push('>');
        uid
    }
}

// =============================================================================
// KEYS
// =============================================================================

/// Public-key algorithm of a generated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
}

impl KeyAlgorithm {
    /// Capabilities are fixed by the algorithm, never chosen by the caller.
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Rsa => Capabilities {
                encrypt: true,
                sign: true,
            },
            Self::Dsa => Capabilities {
                encrypt: false,
                sign: true,
            },
        }
    }

    /// Whether the PGP engine can generate a key of this size.
    ///
    /// Only sizes from [`KEY_SIZES`] are ever accepted; RSA below 2048 and
    /// DSA above 2048 are outside what the engine produces.
    pub fn supports_size(self, bits: u32) -> bool {
        if !KEY_SIZES.contains(&bits) {
            return false;
        }
        match self {
            Self::Rsa => bits >= RSA_MIN_KEY_SIZE,
            Self::Dsa => bits <= DSA_MAX_KEY_SIZE,
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Dsa => write!(f, "DSA"),
        }
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RSA" => Ok(Self::Rsa),
            "DSA" => Ok(Self::Dsa),
            _ => Err(format!("Invalid key type: {}", s)),
        }
    }
}

/// What a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub encrypt: bool,
    pub sign: bool,
}

/// A user's asymmetric key pair as stored by the key store.
#[derive(Clone)]
pub struct AsymmetricKey {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Upper-case hex fingerprint, unique across all keys.
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    /// Armored secret key, protected under the user's passphrase.
    pub private_key: String,
    pub public_key: String,
    pub capabilities: Capabilities,
    /// PHC string of the passphrase the private key was protected with.
    pub passphrase_hash: String,
    pub comment: Option<String>,
    pub expire_at: DateTime<Utc>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for AsymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsymmetricKey")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("private_key", &"[REDACTED]")
            .field("capabilities", &self.capabilities)
            .field("passphrase_hash", &"[REDACTED]")
            .field("expire_at", &self.expire_at)
            .field("is_default", &self.is_default)
            .finish()
    }
}

impl AsymmetricKey {
    /// A key is expired once `now` reaches `expire_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    /// Public-safe projection used for listings.
    pub fn summary(&self) -> KeySummary {
        KeySummary {
            key_id: self.key_id.clone(),
            algorithm: self.algorithm,
            key_size: self.key_size,
            public_key: self.public_key.clone(),
            can_encrypt: self.capabilities.encrypt,
            can_sign: self.capabilities.sign,
            comment: self.comment.clone(),
            expire_at: self.expire_at,
            expired: self.is_expired(),
            is_default: self.is_default,
            created_at: self.created_at,
        }
    }

    /// Full projection for the key's owner. Never includes the passphrase hash.
    pub fn detail(&self) -> KeyDetail {
        KeyDetail {
            summary: self.summary(),
            private_key: self.private_key.clone(),
        }
    }
}

/// Request to persist a freshly generated key.
#[derive(Clone)]
pub struct NewKey {
    pub user_id: Uuid,
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub private_key: String,
    pub public_key: String,
    pub capabilities: Capabilities,
    pub passphrase_hash: String,
    pub comment: Option<String>,
    pub expire_at: DateTime<Utc>,
}

impl std::fmt::Debug for NewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewKey")
            .field("user_id", &self.user_id)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("expire_at", &self.expire_at)
            .finish_non_exhaustive()
    }
}

/// Listing view of a key: no private material, no passphrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySummary {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub public_key: String,
    pub can_encrypt: bool,
    pub can_sign: bool,
    pub comment: Option<String>,
    pub expire_at: DateTime<Utc>,
    pub expired: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Owner's view of a single key, including the protected private key.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyDetail {
    #[serde(flatten)]
    pub summary: KeySummary,
    pub private_key: String,
}

impl std::fmt::Debug for KeyDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDetail")
            .field("summary", &self.summary)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// PEER KEY SNAPSHOTS
// =============================================================================

/// Natural identity of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub holder_id: Uuid,
    pub peer_id: Uuid,
    pub key_id: String,
}

/// A correspondent's public key as captured by the holder at some point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerKeySnapshot {
    pub id: Uuid,
    pub holder_id: Uuid,
    pub peer_id: Uuid,
    pub peer_email: String,
    pub key_id: String,
    pub public_key: String,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PeerKeySnapshot {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expire_at
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            holder_id: self.holder_id,
            peer_id: self.peer_id,
            key_id: self.key_id.clone(),
        }
    }
}

/// Snapshot waiting to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPeerKeySnapshot {
    pub holder_id: Uuid,
    pub peer_id: Uuid,
    pub peer_email: String,
    pub key_id: String,
    pub public_key: String,
    pub expire_at: DateTime<Utc>,
}

impl NewPeerKeySnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            holder_id: self.holder_id,
            peer_id: self.peer_id,
            key_id: self.key_id.clone(),
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// How a stored message body was produced, and so how a reader must open it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    #[default]
    Plain,
    Encrypted,
    Signed,
    EncryptedAndSigned,
}

impl SecurityMode {
    pub fn from_flags(encrypt: bool, sign: bool) -> Self {
        match (encrypt, sign) {
            (false, false) => Self::Plain,
            (true, false) => Self::Encrypted,
            (false, true) => Self::Signed,
            (true, true) => Self::EncryptedAndSigned,
        }
    }

    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Encrypted | Self::EncryptedAndSigned)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Signed | Self::EncryptedAndSigned)
    }

    /// Anything other than [`SecurityMode::Plain`].
    pub fn is_secured(self) -> bool {
        self != Self::Plain
    }
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Encrypted => write!(f, "encrypted"),
            Self::Signed => write!(f, "signed"),
            Self::EncryptedAndSigned => write!(f, "encrypted_and_signed"),
        }
    }
}

/// One participant's stored copy of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: Uuid,
    /// Shared by every copy produced by the same send.
    pub delivery_id: Uuid,
    pub owner_id: Uuid,
    pub sender_id: Uuid,
    pub sender_email: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub mode: SecurityMode,
    pub read: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl MailMessage {
    /// Caller-facing view; the body of a secured copy is withheld until it
    /// goes through the reader.
    pub fn view(&self) -> MessageView {
        MessageView {
            id: self.id,
            sender_email: self.sender_email.clone(),
            recipients: self.recipients.clone(),
            subject: self.subject.clone(),
            body: (!self.mode.is_secured()).then(|| self.body.clone()),
            mode: self.mode,
            read: self.read,
            archived: self.archived,
            created_at: self.created_at,
        }
    }
}

/// A message copy to be created by a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub owner_id: Uuid,
    pub sender_id: Uuid,
    pub sender_email: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub mode: SecurityMode,
    pub read: bool,
}

/// Stored message as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub sender_email: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: Option<String>,
    pub mode: SecurityMode,
    pub read: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// BINDINGS
// =============================================================================

/// Which key material secured a message copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageKeyBinding {
    pub message_id: Uuid,
    /// The sender's cached copy of the recipient key used to encrypt.
    pub recipient_snapshot_id: Option<Uuid>,
    /// Fingerprint of the recipient key the payload was encrypted to.
    pub recipient_key_id: Option<String>,
    /// The recipient's cached copy of the sender key used to sign.
    pub sender_snapshot_id: Option<Uuid>,
    /// Fingerprint of the sender key that produced the signature.
    pub sender_key_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
