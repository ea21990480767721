//! Passphrase hashing with Argon2id, and unlocking stored keys.
//!
//! A key's passphrase is stored as a PHC string so it can be checked before
//! the PGP engine is ever asked to unlock the secret key. [`UnlockedKey`] can
//! only be obtained through that check (or [`UnlockedKey::unchecked`] for
//! file-based tooling that has no stored hash).

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Argon2id parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory in KiB (default: 65536 = 64 MiB).
    pub memory_kib: u32,
    /// Time iterations (default: 3).
    pub iterations: u32,
    /// Parallelism degree (default: 4).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MiB
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Create low-memory parameters (for resource-constrained environments).
    pub fn low_memory() -> Self {
        Self {
            memory_kib: 32768, // 32 MiB
            iterations: 4,
            parallelism: 4,
        }
    }

    /// Create high-security parameters.
    pub fn high_security() -> Self {
        Self {
            memory_kib: 131072, // 128 MiB
            iterations: 4,
            parallelism: 4,
        }
    }

    /// Look up a named profile: `default`, `low_memory` or `high_security`.
    pub fn from_profile(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "default" | "" => Some(Self::default()),
            "low_memory" => Some(Self::low_memory()),
            "high_security" => Some(Self::high_security()),
            _ => None,
        }
    }
}

/// Reject empty passphrases.
pub fn validate_passphrase(passphrase: &str) -> CryptoResult<()> {
    if passphrase.is_empty() {
        return Err(CryptoError::InvalidParameter(
            "Passphrase must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Produces PHC strings for new passphrases.
#[derive(Debug, Clone, Default)]
pub struct PassphraseHasher {
    params: KdfParams,
}

impl PassphraseHasher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Hash a passphrase with a fresh random salt.
    pub fn hash(&self, passphrase: &str) -> CryptoResult<String> {
        validate_passphrase(passphrase)?;

        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            None,
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(hash.to_string())
    }
}

/// Check a passphrase against a stored PHC string.
///
/// The parameters embedded in the PHC string are used, so hashes made under
/// an older profile keep verifying.
pub fn verify_passphrase(passphrase: &str, phc: &str) -> CryptoResult<()> {
    let parsed =
        PasswordHash::new(phc).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    match Argon2::default().verify_password(passphrase.as_bytes(), &parsed) {
        Ok(()) => Ok(()),
        Err(argon2::password_hash::Error::Password) => Err(CryptoError::AuthenticationFailed),
        Err(e) => Err(CryptoError::KeyDerivation(e.to_string())),
    }
}

/// A secret key paired with a passphrase that is known to match it.
pub struct UnlockedKey {
    key_id: String,
    armored: Zeroizing<String>,
    passphrase: Zeroizing<String>,
}

impl UnlockedKey {
    /// Verify `passphrase` against the stored hash, then hold both for the
    /// duration of one engine call.
    pub fn unlock(
        key_id: &str,
        armored_private: &str,
        passphrase_hash: &str,
        passphrase: &str,
    ) -> CryptoResult<Self> {
        verify_passphrase(passphrase, passphrase_hash)?;
        Ok(Self::unchecked(key_id, armored_private, passphrase))
    }

    /// Pair a key and passphrase without a stored hash. The engine still
    /// fails when it cannot decrypt the secret key with this passphrase.
    pub fn unchecked(key_id: &str, armored_private: &str, passphrase: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            armored: Zeroizing::new(armored_private.to_string()),
            passphrase: Zeroizing::new(passphrase.to_string()),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub(crate) fn armored(&self) -> &str {
        &self.armored
    }

    pub(crate) fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedKey")
            .field("key_id", &self.key_id)
            .field("armored", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}
