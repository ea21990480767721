//! Which keys secured which message copy.
//!
//! At send time each secured copy gets a binding naming the recipient key it
//! was encrypted to and the sender key snapshot it was signed with. At read
//! time the binding is the only source of keys: a reader never falls back
//! to anyone's current default, because keys rotate.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use sealpost_core::{
    AsymmetricKey, BindingRepository, Error, KeyRepository, MailMessage, MessageKeyBinding,
    NewPeerKeySnapshot, PeerKeyRepository, PeerKeySnapshot, PlannedBinding, Result, SecurityMode,
};

/// Keys a reader needs to open one message copy.
#[derive(Debug)]
pub struct ResolvedKeys {
    pub binding: MessageKeyBinding,
    /// Reader's own key the copy was encrypted to.
    pub recipient_key: Option<AsymmetricKey>,
    /// Reader's snapshot of the sender key that signed the copy.
    pub sender_key: Option<PeerKeySnapshot>,
}

#[derive(Clone)]
pub struct MessageSecurityBinder {
    bindings: Arc<dyn BindingRepository>,
    keys: Arc<dyn KeyRepository>,
    snapshots: Arc<dyn PeerKeyRepository>,
}

impl MessageSecurityBinder {
    pub fn new(
        bindings: Arc<dyn BindingRepository>,
        keys: Arc<dyn KeyRepository>,
        snapshots: Arc<dyn PeerKeyRepository>,
    ) -> Self {
        Self {
            bindings,
            keys,
            snapshots,
        }
    }

    /// The binding to record with a copy sent in `mode`. Plain copies get
    /// none. `recipient_key` is the sender's snapshot of the key the copy is
    /// encrypted to; `sender_key` is the recipient's snapshot of the signing
    /// key.
    pub fn bind(
        mode: SecurityMode,
        recipient_key: Option<&NewPeerKeySnapshot>,
        sender_key: Option<&NewPeerKeySnapshot>,
    ) -> Option<PlannedBinding> {
        if !mode.is_secured() {
            return None;
        }
        Some(PlannedBinding {
            recipient_key: recipient_key
                .filter(|_| mode.is_encrypted())
                .map(NewPeerKeySnapshot::key),
            sender_key: sender_key
                .filter(|_| mode.is_signed())
                .map(NewPeerKeySnapshot::key),
        })
    }

    /// Keys recorded for `message`, as seen by its owner `reader_id`.
    ///
    /// Fails with `BindingMissing` when the binding, or any key it must
    /// resolve to, is gone.
    pub async fn resolve(&self, reader_id: Uuid, message: &MailMessage) -> Result<ResolvedKeys> {
        let missing = || {
            warn!(
                subsystem = "reader",
                component = "binder",
                op = "resolve",
                user_id = %reader_id,
                message_id = %message.id,
                security_mode = %message.mode,
                "Key binding missing or dangling"
            );
            Error::BindingMissing {
                message_id: message.id,
            }
        };

        let binding = match self.bindings.get_binding(message.id).await? {
            Some(binding) => binding,
            None => return Err(missing()),
        };

        let recipient_key = if message.mode.is_encrypted() {
            let Some(key_id) = binding.recipient_key_id.as_deref() else {
                return Err(missing());
            };
            match self.keys.get_key(reader_id, key_id).await? {
                Some(key) => Some(key),
                None => return Err(missing()),
            }
        } else {
            None
        };

        let sender_key = if message.mode.is_signed() {
            let Some(snapshot_id) = binding.sender_snapshot_id else {
                return Err(missing());
            };
            match self.snapshots.get_snapshot_by_id(snapshot_id).await? {
                Some(s) if s.holder_id == reader_id && s.peer_id == message.sender_id => Some(s),
                _ => return Err(missing()),
            }
        } else {
            None
        };

        debug!(
            subsystem = "reader",
            component = "binder",
            op = "resolve",
            user_id = %reader_id,
            message_id = %message.id,
            recipient_key_id = binding.recipient_key_id.as_deref().unwrap_or("-"),
            sender_key_id = binding.sender_key_id.as_deref().unwrap_or("-"),
            "Binding resolved"
        );

        Ok(ResolvedKeys {
            binding,
            recipient_key,
            sender_key,
        })
    }
}
