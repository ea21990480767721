//! # sealpost-crypto
//!
//! Cryptographic building blocks for sealpost.
//!
//! ## Components
//!
//! - **PGP engine**: [`PgpEngine`] is the seam over OpenPGP; [`RpgpEngine`]
//!   implements it with RSA/DSA keys, SEIPDv1 + AES-256 and SHA-256 signatures.
//! - **Passphrases**: Argon2id PHC hashes checked before a secret key is
//!   handed to the engine ([`UnlockedKey`]).
//! - **Integrity framing**: [`IntegrityEnvelope`] binds an HMAC-SHA256 tag to
//!   the plaintext inside the PGP payload.
//! - **Transform**: [`SecureTransform`] picks the engine operation for a
//!   [`SecurityMode`](sealpost_core::SecurityMode).
//!
//! ## Examples
//!
//! ### Frame and check a body
//!
//! ```rust
//! use sealpost_crypto::IntegrityEnvelope;
//!
//! let envelope = IntegrityEnvelope::new(b"server-secret".to_vec()).unwrap();
//! let framed = envelope.wrap("meet at noon::sharp").unwrap();
//!
//! let unwrapped = envelope.unwrap(&framed);
//! assert!(unwrapped.tag_ok);
//! assert_eq!(unwrapped.plaintext, "meet at noon::sharp");
//! ```
//!
//! ### Hash and check a key passphrase
//!
//! ```rust
//! use sealpost_crypto::{verify_passphrase, KdfParams, PassphraseHasher};
//!
//! let hasher = PassphraseHasher::new(KdfParams::low_memory());
//! let phc = hasher.hash("correct horse").unwrap();
//! assert!(verify_passphrase("correct horse", &phc).is_ok());
//! assert!(verify_passphrase("battery staple", &phc).is_err());
//! ```
//!
//! ### Encrypt to a recipient
//!
//! ```rust,no_run
//! use sealpost_core::KeyAlgorithm;
//! use sealpost_crypto::{KeyGenRequest, PgpEngine, RpgpEngine, UnlockedKey};
//! use zeroize::Zeroizing;
//!
//! let engine = RpgpEngine::new();
//! let key = engine
//!     .new_key(&KeyGenRequest {
//!         algorithm: KeyAlgorithm::Rsa,
//!         key_size: 2048,
//!         user_id: "Bob Example <bob@example.com>".to_string(),
//!         passphrase: Zeroizing::new("bob-pass".to_string()),
//!     })
//!     .unwrap();
//!
//! let ciphertext = engine.encrypt("hello bob", &key.public_key).unwrap();
//! let unlocked = UnlockedKey::unchecked(&key.key_id, &key.private_key, "bob-pass");
//! assert_eq!(engine.decrypt(&ciphertext, &unlocked).unwrap(), "hello bob");
//! ```

pub mod engine;
pub mod error;
pub mod integrity;
pub mod passphrase;
pub mod transform;

// Re-export commonly used types
pub use engine::{GeneratedKey, KeyGenRequest, KeyInfo, PgpEngine, RpgpEngine};
pub use error::{CryptoError, CryptoResult};
pub use integrity::{IntegrityEnvelope, Unwrapped};
pub use passphrase::{
    validate_passphrase, verify_passphrase, KdfParams, PassphraseHasher, UnlockedKey,
};
pub use transform::SecureTransform;
