//! Shared setup for sealpost-mail integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use zeroize::Zeroizing;

use sealpost_core::{KeyAlgorithm, KeySummary, UserIdentity};
use sealpost_crypto::{
    CryptoError, CryptoResult, GeneratedKey, KdfParams, KeyGenRequest, KeyInfo, PgpEngine,
    UnlockedKey,
};
use sealpost_db::InMemoryStore;
use sealpost_mail::{ComposeRequest, GenerateKeyRequest, SealConfig, SecureMail};

pub const SECRET: &[u8] = b"test-integrity-secret";

/// Cheap Argon2id parameters so passphrase checks don't dominate test time.
pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn config() -> SealConfig {
    SealConfig::new(SECRET).with_kdf(fast_kdf())
}

/// Stand-in for the PGP engine with readable, checkable output.
///
/// Public keys are `PUB:<id>`, encryption is `ENC:<id>:<payload>`, signing
/// is `SIG:<id>:<payload>`. Decrypt and verify check the key id, so using
/// the wrong key fails the way a real engine would.
#[derive(Default)]
pub struct FakeEngine {
    generated: AtomicUsize,
    crypto_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn keys_generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Encrypt, decrypt, sign and verify calls so far.
    pub fn crypto_calls(&self) -> usize {
        self.crypto_calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.crypto_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn key_id_of(public: &str) -> CryptoResult<&str> {
    public
        .strip_prefix("PUB:")
        .ok_or_else(|| CryptoError::InvalidKey("not a fake public key".to_string()))
}

fn split<'a>(tag: &str, data: &'a str) -> Option<(&'a str, &'a str)> {
    data.strip_prefix(tag)?.split_once(':')
}

/// Encrypt `payload` for `key_id` the way [`FakeEngine`] does.
pub fn fake_encrypt(key_id: &str, payload: &str) -> String {
    format!("ENC:{}:{}", key_id, payload)
}

impl PgpEngine for FakeEngine {
    fn new_key(&self, request: &KeyGenRequest) -> CryptoResult<GeneratedKey> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        let key_id = format!("FAKE{:04X}", n);
        Ok(GeneratedKey {
            key_id: key_id.clone(),
            algorithm: request.algorithm,
            key_size: request.key_size,
            capabilities: request.algorithm.capabilities(),
            private_key: format!("SEC:{}", key_id),
            public_key: format!("PUB:{}", key_id),
        })
    }

    fn import_key(&self, armored_public: &str) -> CryptoResult<KeyInfo> {
        let key_id = key_id_of(armored_public.trim())?;
        Ok(KeyInfo {
            key_id: key_id.to_string(),
            algorithm: KeyAlgorithm::Rsa,
            capabilities: KeyAlgorithm::Rsa.capabilities(),
            created_at: Utc::now(),
        })
    }

    fn encrypt(&self, plaintext: &str, recipient_public: &str) -> CryptoResult<String> {
        self.count();
        Ok(fake_encrypt(key_id_of(recipient_public)?, plaintext))
    }

    fn decrypt(&self, ciphertext: &str, key: &UnlockedKey) -> CryptoResult<String> {
        self.count();
        match split("ENC:", ciphertext) {
            Some((id, payload)) if id == key.key_id() => Ok(payload.to_string()),
            _ => Err(CryptoError::Decryption("wrong key".to_string())),
        }
    }

    fn sign(&self, plaintext: &str, key: &UnlockedKey) -> CryptoResult<String> {
        self.count();
        Ok(format!("SIG:{}:{}", key.key_id(), plaintext))
    }

    fn verify(&self, signed: &str, sender_public: &str) -> CryptoResult<String> {
        self.count();
        let expected = key_id_of(sender_public)?;
        match split("SIG:", signed) {
            Some((id, payload)) if id == expected => Ok(payload.to_string()),
            _ => Err(CryptoError::SignatureInvalid("bad signature".to_string())),
        }
    }

    fn sign_then_encrypt(
        &self,
        plaintext: &str,
        recipient_public: &str,
        key: &UnlockedKey,
    ) -> CryptoResult<String> {
        let signed = self.sign(plaintext, key)?;
        self.encrypt(&signed, recipient_public)
    }

    fn decrypt_and_verify(
        &self,
        ciphertext: &str,
        key: &UnlockedKey,
        sender_public: &str,
    ) -> CryptoResult<String> {
        let signed = self.decrypt(ciphertext, key)?;
        self.verify(&signed, sender_public)
    }
}

/// An in-memory store, a fake engine and the services over them.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<FakeEngine>,
    pub mail: SecureMail,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(FakeEngine::default());
        let mail = SecureMail::with_engine(store.clone(), engine.clone(), &config())
            .expect("services should wire up");
        Self {
            store,
            engine,
            mail,
        }
    }

    pub fn user(&self, email: &str) -> UserIdentity {
        let (local, _) = email.split_once('@').unwrap_or((email, ""));
        self.store
            .add_user(email, local, "Tester")
            .expect("user should be created")
    }

    pub async fn keygen(&self, user: &UserIdentity, passphrase: &str) -> KeySummary {
        self.mail
            .generate_key(user.id, rsa_request(passphrase))
            .await
            .expect("key generation should succeed")
    }
}

pub fn rsa_request(passphrase: &str) -> GenerateKeyRequest {
    GenerateKeyRequest {
        algorithm: "RSA".to_string(),
        key_size: 2048,
        expire_days: 365,
        passphrase: Zeroizing::new(passphrase.to_string()),
        comment: None,
    }
}

pub fn compose(to: &[&str], body: &str, encrypt: bool, sign: bool, passphrase: &str) -> ComposeRequest {
    ComposeRequest {
        recipients: to.iter().map(|s| s.to_string()).collect(),
        subject: "Quarterly numbers".to_string(),
        body: body.to_string(),
        encrypt,
        sign,
        passphrase: Zeroizing::new(passphrase.to_string()),
    }
}
