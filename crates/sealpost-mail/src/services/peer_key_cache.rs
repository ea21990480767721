//! Public keys received from correspondents.
//!
//! A snapshot is keyed by (holder, peer, key id) and never updated. When a
//! peer rotates keys the holder gains a second snapshot; the old one stays
//! so messages bound to it can still be verified.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use sealpost_core::{
    AsymmetricKey, Error, NewPeerKeySnapshot, PeerKeyRepository, PeerKeySnapshot, Result,
    SnapshotKey, UserIdentity,
};
use sealpost_crypto::PgpEngine;

use super::bounded::{run_bounded, WorkLimits};

#[derive(Clone)]
pub struct PeerKeyCache {
    snapshots: Arc<dyn PeerKeyRepository>,
    engine: Arc<dyn PgpEngine>,
    limits: WorkLimits,
}

impl PeerKeyCache {
    pub fn new(
        snapshots: Arc<dyn PeerKeyRepository>,
        engine: Arc<dyn PgpEngine>,
        limits: WorkLimits,
    ) -> Self {
        Self {
            snapshots,
            engine,
            limits,
        }
    }

    /// The snapshot `holder` would keep of `peer_key`. Nothing is written;
    /// compose commits it together with the messages it secures.
    pub fn plan(holder_id: Uuid, peer: &UserIdentity, peer_key: &AsymmetricKey) -> NewPeerKeySnapshot {
        NewPeerKeySnapshot {
            holder_id,
            peer_id: peer.id,
            peer_email: peer.email.clone(),
            key_id: peer_key.key_id.clone(),
            public_key: peer_key.public_key.clone(),
            expire_at: peer_key.expire_at,
        }
    }

    /// Store a snapshot of `peer_key` for `holder` unless one with the same
    /// key id exists already, returning whichever is stored.
    pub async fn snapshot_and_cache(
        &self,
        holder_id: Uuid,
        peer: &UserIdentity,
        peer_key: &AsymmetricKey,
    ) -> Result<PeerKeySnapshot> {
        self.snapshots
            .insert_snapshot_if_absent(Self::plan(holder_id, peer, peer_key))
            .await
    }

    /// Explicit key exchange: parse an armored public key received out of
    /// band and keep it for `holder`.
    pub async fn import(
        &self,
        holder: &UserIdentity,
        peer: &UserIdentity,
        armored_public: &str,
        expire_days: i64,
    ) -> Result<PeerKeySnapshot> {
        if holder.id == peer.id {
            return Err(Error::InvalidParameter(
                "Own keys cannot be imported as received keys".to_string(),
            ));
        }
        if expire_days <= 0 {
            return Err(Error::InvalidParameter(
                "Expiration must be a positive number of days".to_string(),
            ));
        }

        let engine = self.engine.clone();
        let armored = armored_public.to_string();
        let info = run_bounded("import_key", self.limits.crypto, move || {
            engine.import_key(&armored)
        })
        .await?;

        let snapshot = self
            .snapshots
            .insert_snapshot_if_absent(NewPeerKeySnapshot {
                holder_id: holder.id,
                peer_id: peer.id,
                peer_email: peer.email.clone(),
                key_id: info.key_id,
                public_key: armored_public.trim().to_string(),
                expire_at: Utc::now() + Duration::days(expire_days),
            })
            .await?;

        info!(
            subsystem = "keys",
            component = "peer_key_cache",
            op = "import",
            user_id = %holder.id,
            peer_id = %peer.id,
            key_id = %snapshot.key_id,
            "Received key imported"
        );
        Ok(snapshot)
    }

    pub async fn get(&self, holder_id: Uuid, peer_id: Uuid, key_id: &str) -> Result<PeerKeySnapshot> {
        let key = SnapshotKey {
            holder_id,
            peer_id,
            key_id: key_id.to_string(),
        };
        self.snapshots
            .get_snapshot(&key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Received key {} not found", key_id)))
    }

    /// Lookup by fingerprint alone, whichever peer it came from.
    pub async fn get_by_key_id(&self, holder_id: Uuid, key_id: &str) -> Result<PeerKeySnapshot> {
        self.snapshots
            .find_snapshot_by_key_id(holder_id, key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Received key {} not found", key_id)))
    }

    pub async fn list(&self, holder_id: Uuid) -> Result<Vec<PeerKeySnapshot>> {
        let snapshots = self.snapshots.list_snapshots(holder_id).await?;
        debug!(
            subsystem = "keys",
            component = "peer_key_cache",
            op = "list",
            user_id = %holder_id,
            result_count = snapshots.len(),
            "Received keys listed"
        );
        Ok(snapshots)
    }

    /// Remove the holder's snapshots of `key_id`. Bindings that pointed at
    /// them lose the reference, so messages verified through them become
    /// unreadable.
    pub async fn delete(&self, holder_id: Uuid, key_id: &str) -> Result<()> {
        let removed = self.snapshots.delete_snapshots(holder_id, key_id).await?;
        if removed == 0 {
            return Err(Error::NotFound(format!("Received key {} not found", key_id)));
        }
        info!(
            subsystem = "keys",
            component = "peer_key_cache",
            op = "delete",
            user_id = %holder_id,
            key_id = %key_id,
            result_count = removed,
            "Received key deleted"
        );
        Ok(())
    }

    pub fn is_expired(snapshot: &PeerKeySnapshot) -> bool {
        snapshot.is_expired()
    }
}
