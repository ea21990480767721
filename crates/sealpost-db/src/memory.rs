//! In-memory implementation of every store trait.
//!
//! All state sits behind one mutex, so `commit_delivery` is trivially atomic:
//! the plan is validated and staged first, then applied under the same lock.
//! Used by service tests and anywhere a database is not wanted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use sealpost_core::{
    new_v7, AsymmetricKey, BindingRepository, DeliveryPlan, DeliveryReceipt, Error, KeyRepository,
    MailMessage, MailStore, MessageKeyBinding, NewKey, NewPeerKeySnapshot, PeerKeyRepository,
    PeerKeySnapshot, Result, SnapshotKey, UserDirectory, UserIdentity,
};

#[derive(Default)]
struct State {
    users: Vec<UserIdentity>,
    /// Insertion order, which is creation order.
    keys: Vec<AsymmetricKey>,
    snapshots: Vec<PeerKeySnapshot>,
    messages: Vec<MailMessage>,
    bindings: HashMap<Uuid, MessageKeyBinding>,
    fail_commits: bool,
}

impl State {
    fn snapshot_id(&self, key: &SnapshotKey) -> Option<Uuid> {
        self.snapshots
            .iter()
            .find(|s| s.holder_id == key.holder_id && s.peer_id == key.peer_id && s.key_id == key.key_id)
            .map(|s| s.id)
    }

    fn insert_snapshot_if_absent(&mut self, new: &NewPeerKeySnapshot) -> PeerKeySnapshot {
        if let Some(existing) = self.snapshots.iter().find(|s| s.key() == new.key()) {
            return existing.clone();
        }
        let snapshot = PeerKeySnapshot {
            id: new_v7(),
            holder_id: new.holder_id,
            peer_id: new.peer_id,
            peer_email: new.peer_email.clone(),
            key_id: new.key_id.clone(),
            public_key: new.public_key.clone(),
            expire_at: new.expire_at,
            created_at: Utc::now(),
        };
        self.snapshots.push(snapshot.clone());
        snapshot
    }
}

/// Store backed by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("In-memory store lock poisoned".to_string()))
    }

    /// Register a user. Emails are unique ignoring case.
    pub fn add_user(&self, email: &str, first_name: &str, last_name: &str) -> Result<UserIdentity> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::InvalidParameter("Email must not be empty".to_string()));
        }
        let mut state = self.state()?;
        if state.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(Error::InvalidParameter(format!(
                "User with email {} already exists",
                email
            )));
        }
        let user = UserIdentity {
            id: new_v7(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        state.users.push(user.clone());
        Ok(user)
    }

    // Test hooks: ways to reach states the services never produce on their own.

    /// Move a key's expiry. Returns false if the key does not exist.
    pub fn set_key_expiry(&self, user_id: Uuid, key_id: &str, expire_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state()?;
        match state
            .keys
            .iter_mut()
            .find(|k| k.user_id == user_id && k.key_id == key_id)
        {
            Some(key) => {
                key.expire_at = expire_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Overwrite a stored body, as a compromised store would.
    pub fn replace_body(&self, message_id: Uuid, body: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.body = body.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop a binding without touching its message.
    pub fn remove_binding(&self, message_id: Uuid) -> Result<bool> {
        Ok(self.state()?.bindings.remove(&message_id).is_some())
    }

    /// Make every following `commit_delivery` fail before writing anything.
    pub fn set_fail_commits(&self, fail: bool) -> Result<()> {
        self.state()?.fail_commits = fail;
        Ok(())
    }

    /// Total number of stored message copies across all owners.
    pub fn message_count(&self) -> Result<usize> {
        Ok(self.state()?.messages.len())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<UserIdentity>> {
        Ok(self.state()?.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserIdentity>> {
        let email = email.trim();
        Ok(self
            .state()?
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}

#[async_trait]
impl KeyRepository for InMemoryStore {
    async fn insert_key(&self, key: NewKey) -> Result<AsymmetricKey> {
        let mut state = self.state()?;
        if state.keys.iter().any(|k| k.key_id == key.key_id) {
            return Err(Error::InvalidParameter(format!(
                "Key {} already exists",
                key.key_id
            )));
        }
        let is_default = !state.keys.iter().any(|k| k.user_id == key.user_id);
        let stored = AsymmetricKey {
            id: new_v7(),
            user_id: key.user_id,
            key_id: key.key_id,
            algorithm: key.algorithm,
            key_size: key.key_size,
            private_key: key.private_key,
            public_key: key.public_key,
            capabilities: key.capabilities,
            passphrase_hash: key.passphrase_hash,
            comment: key.comment,
            expire_at: key.expire_at,
            is_default,
            created_at: Utc::now(),
        };
        state.keys.push(stored.clone());
        Ok(stored)
    }

    async fn get_key(&self, user_id: Uuid, key_id: &str) -> Result<Option<AsymmetricKey>> {
        Ok(self
            .state()?
            .keys
            .iter()
            .find(|k| k.user_id == user_id && k.key_id == key_id)
            .cloned())
    }

    async fn get_default_key(&self, user_id: Uuid) -> Result<Option<AsymmetricKey>> {
        Ok(self
            .state()?
            .keys
            .iter()
            .find(|k| k.user_id == user_id && k.is_default)
            .cloned())
    }

    async fn list_keys(&self, user_id: Uuid) -> Result<Vec<AsymmetricKey>> {
        Ok(self
            .state()?
            .keys
            .iter()
            .rev()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_key(&self, user_id: Uuid, key_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        let before = state.keys.len();
        state
            .keys
            .retain(|k| !(k.user_id == user_id && k.key_id == key_id));
        Ok(state.keys.len() != before)
    }

    async fn set_default_key(&self, user_id: Uuid, key_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        if !state
            .keys
            .iter()
            .any(|k| k.user_id == user_id && k.key_id == key_id)
        {
            return Ok(false);
        }
        for key in state.keys.iter_mut().filter(|k| k.user_id == user_id) {
            key.is_default = key.key_id == key_id;
        }
        Ok(true)
    }
}

#[async_trait]
impl PeerKeyRepository for InMemoryStore {
    async fn insert_snapshot_if_absent(
        &self,
        snapshot: NewPeerKeySnapshot,
    ) -> Result<PeerKeySnapshot> {
        Ok(self.state()?.insert_snapshot_if_absent(&snapshot))
    }

    async fn get_snapshot(&self, key: &SnapshotKey) -> Result<Option<PeerKeySnapshot>> {
        Ok(self
            .state()?
            .snapshots
            .iter()
            .find(|s| s.key() == *key)
            .cloned())
    }

    async fn get_snapshot_by_id(&self, id: Uuid) -> Result<Option<PeerKeySnapshot>> {
        Ok(self.state()?.snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn find_snapshot_by_key_id(
        &self,
        holder_id: Uuid,
        key_id: &str,
    ) -> Result<Option<PeerKeySnapshot>> {
        Ok(self
            .state()?
            .snapshots
            .iter()
            .find(|s| s.holder_id == holder_id && s.key_id == key_id)
            .cloned())
    }

    async fn list_snapshots(&self, holder_id: Uuid) -> Result<Vec<PeerKeySnapshot>> {
        Ok(self
            .state()?
            .snapshots
            .iter()
            .rev()
            .filter(|s| s.holder_id == holder_id)
            .cloned()
            .collect())
    }

    async fn delete_snapshots(&self, holder_id: Uuid, key_id: &str) -> Result<u64> {
        let mut state = self.state()?;
        let removed: Vec<Uuid> = state
            .snapshots
            .iter()
            .filter(|s| s.holder_id == holder_id && s.key_id == key_id)
            .map(|s| s.id)
            .collect();
        state.snapshots.retain(|s| !removed.contains(&s.id));
        // ON DELETE SET NULL
        for binding in state.bindings.values_mut() {
            if binding.recipient_snapshot_id.is_some_and(|id| removed.contains(&id)) {
                binding.recipient_snapshot_id = None;
            }
            if binding.sender_snapshot_id.is_some_and(|id| removed.contains(&id)) {
                binding.sender_snapshot_id = None;
            }
        }
        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl MailStore for InMemoryStore {
    async fn get_message(&self, owner_id: Uuid, id: Uuid) -> Result<Option<MailMessage>> {
        Ok(self
            .state()?
            .messages
            .iter()
            .find(|m| m.owner_id == owner_id && m.id == id)
            .cloned())
    }

    async fn list_messages(&self, owner_id: Uuid) -> Result<Vec<MailMessage>> {
        Ok(self
            .state()?
            .messages
            .iter()
            .rev()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn delete_message(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let mut state = self.state()?;
        let before = state.messages.len();
        state
            .messages
            .retain(|m| !(m.owner_id == owner_id && m.id == id));
        if state.messages.len() == before {
            return Ok(false);
        }
        state.bindings.remove(&id);
        Ok(true)
    }

    async fn commit_delivery(&self, plan: DeliveryPlan) -> Result<DeliveryReceipt> {
        let mut state = self.state()?;
        if state.fail_commits {
            return Err(Error::Internal("Injected commit failure".to_string()));
        }

        // Every binding reference must resolve before anything is written.
        let planned: Vec<SnapshotKey> = plan.snapshots.iter().map(|s| s.key()).collect();
        for binding in plan.copies.iter().filter_map(|c| c.binding.as_ref()) {
            for key in [&binding.recipient_key, &binding.sender_key].into_iter().flatten() {
                if !planned.contains(key) && state.snapshot_id(key).is_none() {
                    return Err(Error::Internal(format!(
                        "Binding references unknown snapshot {}",
                        key.key_id
                    )));
                }
            }
        }

        for snapshot in &plan.snapshots {
            state.insert_snapshot_if_absent(snapshot);
        }

        let now = Utc::now();
        let mut message_ids = Vec::with_capacity(plan.copies.len());
        let mut bindings = Vec::new();
        for copy in plan.copies {
            let id = new_v7();
            let m = copy.message;
            state.messages.push(MailMessage {
                id,
                delivery_id: plan.delivery_id,
                owner_id: m.owner_id,
                sender_id: m.sender_id,
                sender_email: m.sender_email,
                recipients: m.recipients,
                subject: m.subject,
                body: m.body,
                mode: m.mode,
                read: m.read,
                archived: false,
                created_at: now,
            });

            if let Some(planned) = copy.binding {
                let binding = MessageKeyBinding {
                    message_id: id,
                    recipient_snapshot_id: planned
                        .recipient_key
                        .as_ref()
                        .and_then(|k| state.snapshot_id(k)),
                    recipient_key_id: planned.recipient_key.map(|k| k.key_id),
                    sender_snapshot_id: planned
                        .sender_key
                        .as_ref()
                        .and_then(|k| state.snapshot_id(k)),
                    sender_key_id: planned.sender_key.map(|k| k.key_id),
                    created_at: now,
                };
                state.bindings.insert(id, binding.clone());
                bindings.push(binding);
            }
            message_ids.push(id);
        }

        Ok(DeliveryReceipt {
            delivery_id: plan.delivery_id,
            message_ids,
            bindings,
        })
    }
}

#[async_trait]
impl BindingRepository for InMemoryStore {
    async fn get_binding(&self, message_id: Uuid) -> Result<Option<MessageKeyBinding>> {
        Ok(self.state()?.bindings.get(&message_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sealpost_core::{
        Capabilities, KeyAlgorithm, NewMessage, PlannedBinding, PlannedCopy, SecurityMode,
    };

    fn new_key(user_id: Uuid, key_id: &str) -> NewKey {
        NewKey {
            user_id,
            key_id: key_id.to_string(),
            algorithm: KeyAlgorithm::Rsa,
            key_size: 2048,
            private_key: "PRIVATE".to_string(),
            public_key: format!("PUBLIC-{}", key_id),
            capabilities: KeyAlgorithm::Rsa.capabilities(),
            passphrase_hash: "$argon2id$fake".to_string(),
            comment: None,
            expire_at: Utc::now() + Duration::days(365),
        }
    }

    fn snapshot(holder: Uuid, peer: Uuid, key_id: &str) -> NewPeerKeySnapshot {
        NewPeerKeySnapshot {
            holder_id: holder,
            peer_id: peer,
            peer_email: "peer@example.com".to_string(),
            key_id: key_id.to_string(),
            public_key: format!("PUBLIC-{}", key_id),
            expire_at: Utc::now() + Duration::days(30),
        }
    }

    fn message(owner: Uuid, sender: Uuid, mode: SecurityMode) -> NewMessage {
        NewMessage {
            owner_id: owner,
            sender_id: sender,
            sender_email: "a@example.com".to_string(),
            recipients: vec!["b@example.com".to_string()],
            subject: "hi".to_string(),
            body: "body".to_string(),
            mode,
            read: owner == sender,
        }
    }

    #[tokio::test]
    async fn test_user_email_lookup_ignores_case() {
        let store = InMemoryStore::new();
        let alice = store.add_user("Alice@Example.com", "Alice", "L").unwrap();
        let found = store.find_user_by_email("alice@example.COM").await.unwrap();
        assert_eq!(found, Some(alice));
        assert!(store.add_user("ALICE@example.com", "A", "B").is_err());
    }

    #[tokio::test]
    async fn test_first_key_is_default_and_stays_default() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let first = store.insert_key(new_key(user, "K1")).await.unwrap();
        let second = store.insert_key(new_key(user, "K2")).await.unwrap();
        assert!(first.is_default);
        assert!(!second.is_default);
        assert_eq!(store.get_default_key(user).await.unwrap().unwrap().key_id, "K1");

        let listed: Vec<String> = store
            .list_keys(user)
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.key_id)
            .collect();
        assert_eq!(listed, vec!["K2", "K1"]);
    }

    #[tokio::test]
    async fn test_duplicate_key_id_rejected() {
        let store = InMemoryStore::new();
        store.insert_key(new_key(Uuid::new_v4(), "K1")).await.unwrap();
        let err = store.insert_key(new_key(Uuid::new_v4(), "K1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_delete_default_does_not_reelect() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_key(new_key(user, "K1")).await.unwrap();
        store.insert_key(new_key(user, "K2")).await.unwrap();

        assert!(store.delete_key(user, "K1").await.unwrap());
        assert!(!store.delete_key(user, "K1").await.unwrap());
        assert!(store.get_default_key(user).await.unwrap().is_none());

        assert!(store.set_default_key(user, "K2").await.unwrap());
        assert!(!store.set_default_key(user, "missing").await.unwrap());
        assert_eq!(store.get_default_key(user).await.unwrap().unwrap().key_id, "K2");
    }

    #[tokio::test]
    async fn test_snapshot_insert_is_idempotent_per_key_id() {
        let store = InMemoryStore::new();
        let (holder, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let a = store.insert_snapshot_if_absent(snapshot(holder, peer, "K1")).await.unwrap();
        let b = store.insert_snapshot_if_absent(snapshot(holder, peer, "K1")).await.unwrap();
        let c = store.insert_snapshot_if_absent(snapshot(holder, peer, "K2")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(store.list_snapshots(holder).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commit_delivery_writes_everything() {
        let store = InMemoryStore::new();
        let (sender, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let rk = snapshot(sender, recipient, "RK");
        let plan = DeliveryPlan {
            delivery_id: Uuid::new_v4(),
            snapshots: vec![rk.clone()],
            copies: vec![
                PlannedCopy {
                    message: message(recipient, sender, SecurityMode::Encrypted),
                    binding: Some(PlannedBinding {
                        recipient_key: Some(rk.key()),
                        sender_key: None,
                    }),
                },
                PlannedCopy {
                    message: message(sender, sender, SecurityMode::Plain),
                    binding: None,
                },
            ],
        };

        let receipt = store.commit_delivery(plan).await.unwrap();
        assert_eq!(receipt.message_ids.len(), 2);
        assert_eq!(receipt.bindings.len(), 1);

        let binding = store
            .get_binding(receipt.message_ids[0])
            .await
            .unwrap()
            .unwrap();
        let snap = store.get_snapshot(&rk.key()).await.unwrap().unwrap();
        assert_eq!(binding.recipient_snapshot_id, Some(snap.id));
        assert_eq!(binding.recipient_key_id.as_deref(), Some("RK"));
        assert!(store.get_binding(receipt.message_ids[1]).await.unwrap().is_none());

        // Deleting the copy deletes its binding.
        assert!(store.delete_message(recipient, receipt.message_ids[0]).await.unwrap());
        assert!(store.get_binding(receipt.message_ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_delivery_with_dangling_reference_writes_nothing() {
        let store = InMemoryStore::new();
        let (sender, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let plan = DeliveryPlan {
            delivery_id: Uuid::new_v4(),
            snapshots: vec![snapshot(sender, recipient, "OTHER")],
            copies: vec![PlannedCopy {
                message: message(recipient, sender, SecurityMode::Encrypted),
                binding: Some(PlannedBinding {
                    recipient_key: Some(SnapshotKey {
                        holder_id: sender,
                        peer_id: recipient,
                        key_id: "MISSING".to_string(),
                    }),
                    sender_key: None,
                }),
            }],
        };

        assert!(store.commit_delivery(plan).await.is_err());
        assert_eq!(store.message_count().unwrap(), 0);
        assert!(store.list_snapshots(sender).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_snapshot_nulls_binding_reference() {
        let store = InMemoryStore::new();
        let (sender, recipient) = (Uuid::new_v4(), Uuid::new_v4());
        let sk = snapshot(recipient, sender, "SK");
        let receipt = store
            .commit_delivery(DeliveryPlan {
                delivery_id: Uuid::new_v4(),
                snapshots: vec![sk.clone()],
                copies: vec![PlannedCopy {
                    message: message(recipient, sender, SecurityMode::Signed),
                    binding: Some(PlannedBinding {
                        recipient_key: None,
                        sender_key: Some(sk.key()),
                    }),
                }],
            })
            .await
            .unwrap();

        assert_eq!(store.delete_snapshots(recipient, "SK").await.unwrap(), 1);
        let binding = store
            .get_binding(receipt.message_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.sender_snapshot_id, None);
        assert_eq!(binding.sender_key_id.as_deref(), Some("SK"));
    }

    #[test]
    fn test_capabilities_carried_through() {
        let key = new_key(Uuid::nil(), "K");
        assert_eq!(
            key.capabilities,
            Capabilities {
                encrypt: true,
                sign: true
            }
        );
    }
}
