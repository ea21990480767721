//! UUID v7 helpers.
//!
//! Every row id in sealpost is a UUIDv7 so ids sort by creation time, which
//! is the order listings return.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7 identifier.
///
/// # Example
///
/// ```
/// use sealpost_core::uuid_utils::{is_v7, new_v7};
///
/// let id = new_v7();
/// assert!(is_v7(&id));
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}
