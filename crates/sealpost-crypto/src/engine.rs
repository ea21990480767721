//! The PGP engine seam and its rPGP-backed implementation.
//!
//! Everything crossing this boundary is ASCII-armored text, so callers never
//! touch engine types. All operations are synchronous and CPU-bound; async
//! callers run them on a blocking thread.

use chrono::{DateTime, Utc};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::public_key::PublicKeyAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::{CompressionAlgorithm, PublicKeyTrait};
use pgp::{
    ArmorOptions, Deserializable, DsaKeySize, KeyType, Message, SecretKeyParamsBuilder,
    SignedPublicKey, SignedSecretKey,
};
use smallvec::smallvec;
use zeroize::Zeroizing;

use sealpost_core::defaults::LITERAL_FILE_NAME;
use sealpost_core::{Capabilities, KeyAlgorithm};

use crate::error::{CryptoError, CryptoResult};
use crate::passphrase::{validate_passphrase, UnlockedKey};

/// Parameters for a new key pair.
pub struct KeyGenRequest {
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    /// OpenPGP user id, e.g. `Alice (work) <alice@example.com>`.
    pub user_id: String,
    pub passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for KeyGenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenRequest")
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("user_id", &self.user_id)
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// A freshly generated key pair, both halves armored. The private half is
/// protected under the request passphrase.
#[derive(Clone)]
pub struct GeneratedKey {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub capabilities: Capabilities,
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("capabilities", &self.capabilities)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// What the engine learned from an imported public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
}

/// Narrow interface over an OpenPGP implementation.
pub trait PgpEngine: Send + Sync {
    fn new_key(&self, request: &KeyGenRequest) -> CryptoResult<GeneratedKey>;

    /// Parse and self-verify an armored public key.
    fn import_key(&self, armored_public: &str) -> CryptoResult<KeyInfo>;

    fn encrypt(&self, plaintext: &str, recipient_public: &str) -> CryptoResult<String>;

    fn decrypt(&self, ciphertext: &str, key: &UnlockedKey) -> CryptoResult<String>;

    fn sign(&self, plaintext: &str, key: &UnlockedKey) -> CryptoResult<String>;

    /// Returns the signed content only if the signature verifies.
    fn verify(&self, signed: &str, sender_public: &str) -> CryptoResult<String>;

    fn sign_then_encrypt(
        &self,
        plaintext: &str,
        recipient_public: &str,
        key: &UnlockedKey,
    ) -> CryptoResult<String>;

    fn decrypt_and_verify(
        &self,
        ciphertext: &str,
        key: &UnlockedKey,
        sender_public: &str,
    ) -> CryptoResult<String>;
}

/// [`PgpEngine`] on top of the pure-Rust `pgp` crate.
///
/// Keys are V4 with a single primary key: RSA keys certify, sign and
/// encrypt; DSA keys certify and sign. Secret keys are protected with
/// AES-256 under an iterated and salted SHA-256 S2K. Messages use SEIPDv1
/// with AES-256 and SHA-256 signatures.
#[derive(Debug, Clone, Default)]
pub struct RpgpEngine;

impl RpgpEngine {
    pub fn new() -> Self {
        Self
    }
}

fn fingerprint_hex(key: &impl PublicKeyTrait) -> String {
    hex::encode_upper(key.fingerprint().as_bytes())
}

fn algorithm_of(algorithm: PublicKeyAlgorithm) -> Option<KeyAlgorithm> {
    match algorithm {
        PublicKeyAlgorithm::RSA | PublicKeyAlgorithm::RSAEncrypt | PublicKeyAlgorithm::RSASign => {
            Some(KeyAlgorithm::Rsa)
        }
        PublicKeyAlgorithm::DSA => Some(KeyAlgorithm::Dsa),
        _ => None,
    }
}

fn key_type(algorithm: KeyAlgorithm, key_size: u32) -> CryptoResult<KeyType> {
    if !algorithm.supports_size(key_size) {
        return Err(CryptoError::InvalidParameter(format!(
            "{} keys of {} bits are not supported",
            algorithm, key_size
        )));
    }
    match (algorithm, key_size) {
        (KeyAlgorithm::Rsa, bits) => Ok(KeyType::Rsa(bits)),
        (KeyAlgorithm::Dsa, 1024) => Ok(KeyType::Dsa(DsaKeySize::B1024)),
        (KeyAlgorithm::Dsa, 2048) => Ok(KeyType::Dsa(DsaKeySize::B2048)),
        (KeyAlgorithm::Dsa, bits) => Err(CryptoError::InvalidParameter(format!(
            "DSA keys of {} bits are not supported",
            bits
        ))),
    }
}

fn parse_public(armored: &str) -> pgp::errors::Result<SignedPublicKey> {
    let (key, _headers) = SignedPublicKey::from_string(armored)?;
    Ok(key)
}

fn parse_secret(armored: &str) -> pgp::errors::Result<SignedSecretKey> {
    let (key, _headers) = SignedSecretKey::from_string(armored)?;
    Ok(key)
}

fn parse_message(armored: &str) -> pgp::errors::Result<Message> {
    let (message, _headers) = Message::from_string(armored)?;
    Ok(message)
}

fn literal(plaintext: &str) -> Message {
    // Binary literal data: text mode would rewrite line endings.
    Message::new_literal_bytes(LITERAL_FILE_NAME, plaintext.as_bytes())
}

fn content(message: &Message) -> Result<String, String> {
    let bytes = message
        .get_content()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "message has no literal data".to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn armor(message: &Message) -> pgp::errors::Result<String> {
    message.to_armored_string(ArmorOptions::default())
}

impl RpgpEngine {
    fn recipient_key(&self, armored: &str) -> CryptoResult<SignedPublicKey> {
        let key = parse_public(armored)
            .map_err(|e| CryptoError::Encryption(format!("invalid recipient key: {}", e)))?;
        if !key.is_encryption_key() {
            return Err(CryptoError::Encryption(format!(
                "key {} cannot encrypt",
                fingerprint_hex(&key)
            )));
        }
        Ok(key)
    }

    fn signing_key(&self, key: &UnlockedKey) -> CryptoResult<SignedSecretKey> {
        let secret = parse_secret(key.armored())
            .map_err(|e| CryptoError::Encryption(format!("invalid signing key: {}", e)))?;
        if !secret.is_signing_key() {
            return Err(CryptoError::Encryption(format!(
                "key {} cannot sign",
                key.key_id()
            )));
        }
        Ok(secret)
    }

    fn signed_literal(&self, plaintext: &str, key: &UnlockedKey) -> CryptoResult<Message> {
        let secret = self.signing_key(key)?;
        let mut rng = rand::thread_rng();
        literal(plaintext)
            .sign(
                &mut rng,
                &secret,
                || key.passphrase().to_string(),
                HashAlgorithm::SHA2_256,
            )
            .map_err(|e| CryptoError::Encryption(format!("signing failed: {}", e)))
    }

    fn encrypt_message(&self, message: &Message, recipient_public: &str) -> CryptoResult<String> {
        let recipient = self.recipient_key(recipient_public)?;
        let mut rng = rand::thread_rng();
        let encrypted = message
            .encrypt_to_keys_seipdv1(&mut rng, SymmetricKeyAlgorithm::AES256, &[&recipient])
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        armor(&encrypted).map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    fn decrypt_message(&self, ciphertext: &str, key: &UnlockedKey) -> CryptoResult<Message> {
        let secret = parse_secret(key.armored())
            .map_err(|e| CryptoError::Decryption(format!("invalid private key: {}", e)))?;
        let message = parse_message(ciphertext)
            .map_err(|e| CryptoError::Decryption(format!("invalid message: {}", e)))?;
        let (decrypted, _key_ids) = message
            .decrypt(|| key.passphrase().to_string(), &[&secret])
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        Ok(decrypted)
    }
}

impl PgpEngine for RpgpEngine {
    fn new_key(&self, request: &KeyGenRequest) -> CryptoResult<GeneratedKey> {
        let key_type = key_type(request.algorithm, request.key_size)?;
        validate_passphrase(&request.passphrase)?;
        let capabilities = request.algorithm.capabilities();

        let mut builder = SecretKeyParamsBuilder::default();
        builder
            .key_type(key_type)
            .can_certify(true)
            .can_sign(capabilities.sign)
            .can_encrypt(capabilities.encrypt)
            .primary_user_id(request.user_id.clone())
            .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
            .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256])
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
            .passphrase(Some(request.passphrase.to_string()));
        let params = builder
            .build()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let mut rng = rand::thread_rng();
        let secret = params
            .generate(&mut rng)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let passphrase = &request.passphrase;
        let signed = secret
            .sign(&mut rng, || passphrase.to_string())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        let key_id = fingerprint_hex(&signed);
        let private_key = signed
            .to_armored_string(ArmorOptions::default())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_key = SignedPublicKey::from(signed)
            .to_armored_string(ArmorOptions::default())
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Ok(GeneratedKey {
            key_id,
            algorithm: request.algorithm,
            key_size: request.key_size,
            capabilities,
            private_key,
            public_key,
        })
    }

    fn import_key(&self, armored_public: &str) -> CryptoResult<KeyInfo> {
        let key = parse_public(armored_public)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        key.verify()
            .map_err(|e| CryptoError::InvalidKey(format!("self-signature: {}", e)))?;
        let algorithm = algorithm_of(key.algorithm()).ok_or_else(|| {
            CryptoError::InvalidKey(format!("unsupported algorithm {:?}", key.algorithm()))
        })?;

        Ok(KeyInfo {
            key_id: fingerprint_hex(&key),
            algorithm,
            capabilities: Capabilities {
                encrypt: key.is_encryption_key(),
                sign: key.is_signing_key(),
            },
            created_at: *key.created_at(),
        })
    }

    fn encrypt(&self, plaintext: &str, recipient_public: &str) -> CryptoResult<String> {
        self.encrypt_message(&literal(plaintext), recipient_public)
    }

    fn decrypt(&self, ciphertext: &str, key: &UnlockedKey) -> CryptoResult<String> {
        let decrypted = self.decrypt_message(ciphertext, key)?;
        content(&decrypted).map_err(CryptoError::Decryption)
    }

    fn sign(&self, plaintext: &str, key: &UnlockedKey) -> CryptoResult<String> {
        let signed = self.signed_literal(plaintext, key)?;
        armor(&signed).map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    fn verify(&self, signed: &str, sender_public: &str) -> CryptoResult<String> {
        let sender = parse_public(sender_public)
            .map_err(|e| CryptoError::SignatureInvalid(format!("invalid sender key: {}", e)))?;
        let message = parse_message(signed)
            .map_err(|e| CryptoError::SignatureInvalid(format!("invalid message: {}", e)))?;
        message
            .verify(&sender)
            .map_err(|e| CryptoError::SignatureInvalid(e.to_string()))?;
        content(&message).map_err(CryptoError::SignatureInvalid)
    }

    fn sign_then_encrypt(
        &self,
        plaintext: &str,
        recipient_public: &str,
        key: &UnlockedKey,
    ) -> CryptoResult<String> {
        let signed = self.signed_literal(plaintext, key)?;
        self.encrypt_message(&signed, recipient_public)
    }

    fn decrypt_and_verify(
        &self,
        ciphertext: &str,
        key: &UnlockedKey,
        sender_public: &str,
    ) -> CryptoResult<String> {
        let sender = parse_public(sender_public)
            .map_err(|e| CryptoError::SignatureInvalid(format!("invalid sender key: {}", e)))?;
        let decrypted = self.decrypt_message(ciphertext, key)?;
        decrypted
            .verify(&sender)
            .map_err(|e| CryptoError::SignatureInvalid(e.to_string()))?;
        content(&decrypted).map_err(CryptoError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_rejects_engine_unsupported_sizes() {
        assert!(matches!(
            key_type(KeyAlgorithm::Rsa, 1024),
            Err(CryptoError::InvalidParameter(_))
        ));
        assert!(matches!(
            key_type(KeyAlgorithm::Dsa, 4096),
            Err(CryptoError::InvalidParameter(_))
        ));
        assert!(matches!(
            key_type(KeyAlgorithm::Rsa, 3000),
            Err(CryptoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_key_type_maps_supported_sizes() {
        assert!(matches!(
            key_type(KeyAlgorithm::Rsa, 4096),
            Ok(KeyType::Rsa(4096))
        ));
        assert!(matches!(
            key_type(KeyAlgorithm::Dsa, 1024),
            Ok(KeyType::Dsa(DsaKeySize::B1024))
        ));
        assert!(matches!(
            key_type(KeyAlgorithm::Dsa, 2048),
            Ok(KeyType::Dsa(DsaKeySize::B2048))
        ));
    }

    #[test]
    fn test_algorithm_mapping() {
        assert_eq!(algorithm_of(PublicKeyAlgorithm::RSA), Some(KeyAlgorithm::Rsa));
        assert_eq!(algorithm_of(PublicKeyAlgorithm::DSA), Some(KeyAlgorithm::Dsa));
        assert_eq!(algorithm_of(PublicKeyAlgorithm::Ed25519), None);
    }

    #[test]
    fn test_new_key_rejects_empty_passphrase_before_generation() {
        let request = KeyGenRequest {
            algorithm: KeyAlgorithm::Rsa,
            key_size: 4096,
            user_id: "Nobody <nobody@example.com>".to_string(),
            passphrase: Zeroizing::new(String::new()),
        };
        assert!(matches!(
            RpgpEngine::new().new_key(&request),
            Err(CryptoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_import_garbage_is_invalid_key() {
        assert!(matches!(
            RpgpEngine::new().import_key("not a key"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_keygen_request_debug_redacted() {
        let request = KeyGenRequest {
            algorithm: KeyAlgorithm::Rsa,
            key_size: 2048,
            user_id: "A <a@example.com>".to_string(),
            passphrase: Zeroizing::new("hunter2".to_string()),
        };
        assert!(!format!("{:?}", request).contains("hunter2"));
    }
}
