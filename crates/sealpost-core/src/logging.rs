//! Structured logging field names shared by every sealpost crate.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store or engine failure that needs operator attention |
//! | WARN  | Request rejected (bad passphrase, expired key, tampering) |
//! | INFO  | Completed operations (key generated, message sent) |
//! | DEBUG | Decision points (security mode, snapshot reuse) |
//! | TRACE | Per-recipient iteration |
//!
//! Secret material never appears in any field: no private keys, passphrases,
//! passphrase hashes, message bodies or integrity secrets.

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "keys", "compose", "reader", "crypto", "database"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "key_store", "peer_key_cache", "binder", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "generate", "compose", "decrypt", "commit_delivery"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID the operation runs on behalf of.
pub const USER_ID: &str = "user_id";

/// Message copy UUID.
pub const MESSAGE_ID: &str = "message_id";

/// Delivery UUID shared by every copy of one send.
pub const DELIVERY_ID: &str = "delivery_id";

/// PGP key fingerprint.
pub const KEY_ID: &str = "key_id";

/// Security variant of a message.
pub const SECURITY_MODE: &str = "security_mode";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of recipients in a compose.
pub const RECIPIENT_COUNT: &str = "recipient_count";

/// Number of rows or records returned.
pub const RESULT_COUNT: &str = "result_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Machine-readable error code.
pub const ERROR_CODE: &str = "error_code";
