//! A user's own key pairs: generation, lookup, default selection.
//!
//! The first key a user generates becomes their default. Deleting the
//! default never promotes another key; the user designates one explicitly
//! with [`KeyStore::set_default`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use sealpost_core::defaults::KEY_SIZES;
use sealpost_core::{
    AsymmetricKey, Error, KeyAlgorithm, KeyDetail, KeyRepository, KeySummary, NewKey, Result,
    UserIdentity,
};
use sealpost_crypto::{validate_passphrase, KeyGenRequest, PassphraseHasher, PgpEngine, UnlockedKey};

use super::bounded::{run_bounded, WorkLimits};

/// Parameters of a key generation request.
pub struct GenerateKey {
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub expire_days: i64,
    pub passphrase: Zeroizing<String>,
    pub comment: Option<String>,
}

impl std::fmt::Debug for GenerateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateKey")
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("expire_days", &self.expire_days)
            .field("passphrase", &"[REDACTED]")
            .field("comment", &self.comment)
            .finish()
    }
}

impl GenerateKey {
    /// Reject anything outside the enumerated algorithms, sizes and expiries
    /// before any work is done.
    pub fn validate(&self) -> Result<()> {
        if !KEY_SIZES.contains(&self.key_size) {
            return Err(Error::InvalidParameter(format!(
                "Key size must be one of {:?}, got {}",
                KEY_SIZES, self.key_size
            )));
        }
        if !self.algorithm.supports_size(self.key_size) {
            return Err(Error::InvalidParameter(format!(
                "{} keys of {} bits are not supported",
                self.algorithm, self.key_size
            )));
        }
        if self.expire_days <= 0 {
            return Err(Error::InvalidParameter(
                "Expiration must be a positive number of days".to_string(),
            ));
        }
        validate_passphrase(&self.passphrase)?;
        Ok(())
    }
}

/// Owns key material for every user.
#[derive(Clone)]
pub struct KeyStore {
    keys: Arc<dyn KeyRepository>,
    engine: Arc<dyn PgpEngine>,
    hasher: PassphraseHasher,
    limits: WorkLimits,
}

impl KeyStore {
    pub fn new(
        keys: Arc<dyn KeyRepository>,
        engine: Arc<dyn PgpEngine>,
        hasher: PassphraseHasher,
        limits: WorkLimits,
    ) -> Self {
        Self {
            keys,
            engine,
            hasher,
            limits,
        }
    }

    /// Generate and store a key pair for `user`.
    pub async fn generate(&self, user: &UserIdentity, request: GenerateKey) -> Result<AsymmetricKey> {
        request.validate()?;
        let start = Instant::now();

        let engine = self.engine.clone();
        let hasher = self.hasher.clone();
        let keygen = KeyGenRequest {
            algorithm: request.algorithm,
            key_size: request.key_size,
            user_id: user.pgp_user_id(request.comment.as_deref()),
            passphrase: request.passphrase,
        };
        let (generated, passphrase_hash) =
            run_bounded("generate_key", self.limits.keygen, move || {
                let hash = hasher.hash(&keygen.passphrase)?;
                let generated = engine.new_key(&keygen)?;
                Ok::<_, sealpost_crypto::CryptoError>((generated, hash))
            })
            .await?;

        let key = self
            .keys
            .insert_key(NewKey {
                user_id: user.id,
                key_id: generated.key_id,
                algorithm: generated.algorithm,
                key_size: generated.key_size,
                private_key: generated.private_key,
                public_key: generated.public_key,
                capabilities: generated.capabilities,
                passphrase_hash,
                comment: request.comment.filter(|c| !c.trim().is_empty()),
                expire_at: Utc::now() + Duration::days(request.expire_days),
            })
            .await?;

        info!(
            subsystem = "keys",
            component = "key_store",
            op = "generate",
            user_id = %user.id,
            key_id = %key.key_id,
            algorithm = %key.algorithm,
            key_size = key.key_size,
            is_default = key.is_default,
            duration_ms = start.elapsed().as_millis() as u64,
            "Key generated"
        );
        Ok(key)
    }

    /// The user's default key, or `KeyNotFound`.
    pub async fn get_default(&self, user_id: Uuid) -> Result<AsymmetricKey> {
        self.keys
            .get_default_key(user_id)
            .await?
            .ok_or_else(|| Error::key_not_found(format!("No default key for user {}", user_id)))
    }

    pub async fn get(&self, user_id: Uuid, key_id: &str) -> Result<AsymmetricKey> {
        self.keys
            .get_key(user_id, key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Key {} not found", key_id)))
    }

    /// Owner's view of one key.
    pub async fn detail(&self, user_id: Uuid, key_id: &str) -> Result<KeyDetail> {
        Ok(self.get(user_id, key_id).await?.detail())
    }

    /// Public-safe projection of every key, newest first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<KeySummary>> {
        let keys = self.keys.list_keys(user_id).await?;
        debug!(
            subsystem = "keys",
            component = "key_store",
            op = "list",
            user_id = %user_id,
            result_count = keys.len(),
            "Keys listed"
        );
        Ok(keys.iter().map(AsymmetricKey::summary).collect())
    }

    pub async fn delete(&self, user_id: Uuid, key_id: &str) -> Result<()> {
        if !self.keys.delete_key(user_id, key_id).await? {
            return Err(Error::NotFound(format!("Key {} not found", key_id)));
        }
        info!(
            subsystem = "keys",
            component = "key_store",
            op = "delete",
            user_id = %user_id,
            key_id = %key_id,
            "Key deleted"
        );
        Ok(())
    }

    pub async fn set_default(&self, user_id: Uuid, key_id: &str) -> Result<()> {
        if !self.keys.set_default_key(user_id, key_id).await? {
            return Err(Error::NotFound(format!("Key {} not found", key_id)));
        }
        info!(
            subsystem = "keys",
            component = "key_store",
            op = "set_default",
            user_id = %user_id,
            key_id = %key_id,
            "Default key changed"
        );
        Ok(())
    }

    pub fn is_expired(key: &AsymmetricKey) -> bool {
        key.is_expired()
    }

    /// Check `passphrase` against the key's stored hash and pair them for
    /// engine use. Fails with `AuthenticationFailed` on mismatch; the engine
    /// is not involved.
    pub async fn unlock(&self, key: &AsymmetricKey, passphrase: &str) -> Result<UnlockedKey> {
        let key_id = key.key_id.clone();
        let armored = Zeroizing::new(key.private_key.clone());
        let hash = key.passphrase_hash.clone();
        let passphrase = Zeroizing::new(passphrase.to_string());

        let unlocked = run_bounded("unlock_key", self.limits.crypto, move || {
            UnlockedKey::unlock(&key_id, &armored, &hash, &passphrase)
        })
        .await;

        if let Err(Error::AuthenticationFailed) = &unlocked {
            warn!(
                subsystem = "keys",
                component = "key_store",
                op = "unlock",
                user_id = %key.user_id,
                key_id = %key.key_id,
                "Passphrase mismatch"
            );
        }
        unlocked
    }
}
