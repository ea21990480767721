//! # sealpost-core
//!
//! Core types, traits, and error taxonomy for sealpost, a secure-messaging
//! layer that encrypts, signs and integrity-protects mail bodies with
//! per-user PGP keys.
//!
//! This crate has no cryptography and no storage of its own; the other
//! sealpost crates depend on the models and traits defined here.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorCode, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{is_v7, new_v7};
