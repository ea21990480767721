//! # sealpost-mail
//!
//! The secure-messaging pipeline: key lifecycle, received-key caching,
//! compose with encryption and signing, and binding-driven decryption.
//!
//! [`SecureMail`] wires the services over any [`SecureStore`]
//! (`sealpost_db::Database` in production, `sealpost_db::InMemoryStore` in
//! tests):
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sealpost_db::Database;
//! use sealpost_mail::{SealConfig, SecureMail};
//!
//! let config = SealConfig::from_env()?;
//! let db = Arc::new(Database::connect(&config.database_url).await?);
//! let mail = SecureMail::new(db, &config)?;
//! let keys = mail.list_keys(user_id).await;
//! ```
//!
//! [`SecureStore`]: sealpost_core::SecureStore

pub mod config;
pub mod secure_mail;
pub mod services;

pub use config::SealConfig;
pub use secure_mail::{
    ComposeResponse, ErrorBody, GenerateKeyRequest, Outcome, ReceivedKey, SecureMail,
};
pub use services::{
    parse_recipients, ComposeRequest, DecryptedMessage, GenerateKey, KeyStore, PeerKeyCache,
    WorkLimits,
};
