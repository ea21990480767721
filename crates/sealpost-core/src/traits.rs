//! Storage traits for sealpost.
//!
//! These are the seams between the secure-messaging services and whatever
//! persists users, keys, snapshots, messages and bindings. `sealpost-db`
//! provides a PostgreSQL implementation and an in-memory one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// IDENTITY
// =============================================================================

/// Read access to the identity collaborator.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserIdentity>>;

    /// Exact, case-insensitive match on the email address.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserIdentity>>;
}

// =============================================================================
// KEYS
// =============================================================================

/// Persistence for a user's own key pairs.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Insert a key. It becomes the default iff the user had no keys yet.
    async fn insert_key(&self, key: NewKey) -> Result<AsymmetricKey>;

    async fn get_key(&self, user_id: Uuid, key_id: &str) -> Result<Option<AsymmetricKey>>;

    async fn get_default_key(&self, user_id: Uuid) -> Result<Option<AsymmetricKey>>;

    /// All keys of a user, newest first.
    async fn list_keys(&self, user_id: Uuid) -> Result<Vec<AsymmetricKey>>;

    /// Returns false when the key does not exist. Never re-elects a default.
    async fn delete_key(&self, user_id: Uuid, key_id: &str) -> Result<bool>;

    /// Make `key_id` the only default key of the user. Returns false when the
    /// key does not exist.
    async fn set_default_key(&self, user_id: Uuid, key_id: &str) -> Result<bool>;
}

// =============================================================================
// PEER KEY SNAPSHOTS
// =============================================================================

/// Persistence for public keys received from correspondents.
#[async_trait]
pub trait PeerKeyRepository: Send + Sync {
    /// Insert unless (holder, peer, key_id) already exists; either way the
    /// stored snapshot is returned.
    async fn insert_snapshot_if_absent(
        &self,
        snapshot: NewPeerKeySnapshot,
    ) -> Result<PeerKeySnapshot>;

    async fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<PeerKeySnapshot>>;

    async fn get_snapshot_by_id(&self, id: Uuid) -> Result<Option<PeerKeySnapshot>>;

    /// First snapshot the holder has for a fingerprint, from any peer.
    async fn find_snapshot_by_key_id(
        &self,
        holder_id: Uuid,
        key_id: &str,
    ) -> Result<Option<PeerKeySnapshot>>;

    async fn list_snapshots(&self, holder_id: Uuid) -> Result<Vec<PeerKeySnapshot>>;

    /// Delete the holder's snapshots of a fingerprint. Returns rows removed.
    async fn delete_snapshots(&self, holder_id: Uuid, key_id: &str) -> Result<u64>;
}

// =============================================================================
// MESSAGES AND BINDINGS
// =============================================================================

/// Binding to record for one message copy. Snapshots are referenced by
/// natural key so they can be created in the same delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBinding {
    pub recipient_key: Option<SnapshotKey>,
    pub sender_key: Option<SnapshotKey>,
}

/// One message copy plus its optional binding.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCopy {
    pub message: NewMessage,
    pub binding: Option<PlannedBinding>,
}

/// Everything a single send writes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPlan {
    pub delivery_id: Uuid,
    pub snapshots: Vec<NewPeerKeySnapshot>,
    pub copies: Vec<PlannedCopy>,
}

/// What a committed delivery produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub delivery_id: Uuid,
    /// Message ids in the same order as `DeliveryPlan::copies`.
    pub message_ids: Vec<Uuid>,
    pub bindings: Vec<MessageKeyBinding>,
}

/// The mail-store collaborator.
#[async_trait]
pub trait MailStore: Send + Sync {
    async fn get_message(&self, owner_id: Uuid, id: Uuid) -> Result<Option<MailMessage>>;

    /// Copies owned by a user, newest first.
    async fn list_messages(&self, owner_id: Uuid) -> Result<Vec<MailMessage>>;

    /// Deleting a copy deletes its binding.
    async fn delete_message(&self, owner_id: Uuid, id: Uuid) -> Result<bool>;

    /// Write snapshots, copies and bindings atomically. Either all of the
    /// plan becomes visible or none of it does.
    async fn commit_delivery(&self, plan: DeliveryPlan) -> Result<DeliveryReceipt>;
}

/// Read access to message key bindings.
#[async_trait]
pub trait BindingRepository: Send + Sync {
    async fn get_binding(&self, message_id: Uuid) -> Result<Option<MessageKeyBinding>>;
}

/// Every store capability the secure-messaging services need.
pub trait SecureStore:
    UserDirectory + KeyRepository + PeerKeyRepository + MailStore + BindingRepository
{
}

impl<T> SecureStore for T where
    T: UserDirectory + KeyRepository + PeerKeyRepository + MailStore + BindingRepository
{
}
