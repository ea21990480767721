//! Service layer for the secure-messaging pipeline.

pub mod binder;
pub mod bounded;
pub mod compose;
pub mod key_store;
pub mod peer_key_cache;
pub mod reader;

pub use binder::{MessageSecurityBinder, ResolvedKeys};
pub use bounded::{run_bounded, WorkLimits};
pub use compose::{parse_recipients, ComposePipeline, ComposeRequest};
pub use key_store::{GenerateKey, KeyStore};
pub use peer_key_cache::PeerKeyCache;
pub use reader::{DecryptedMessage, SecureReader};
