//! Keyed integrity tag carried inside the encrypted payload.
//!
//! Frame layout:
//!
//! ```text
//! <decimal byte length of plaintext> ":" <plaintext> "::" <hex HMAC-SHA256(secret, plaintext)>
//! ```
//!
//! The length prefix makes the split exact, so plaintext may contain `::`
//! (or anything else). The frame is what gets encrypted or signed; the tag
//! is never visible outside the PGP envelope.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use sealpost_core::defaults::{
    ENVELOPE_LENGTH_SEPARATOR, ENVELOPE_TAG_HEX_LEN, ENVELOPE_TAG_SEPARATOR,
};

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Result of unwrapping a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub plaintext: String,
    pub tag_ok: bool,
}

/// Wraps and verifies frames under one process-wide secret.
#[derive(Clone)]
pub struct IntegrityEnvelope {
    secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for IntegrityEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityEnvelope")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IntegrityEnvelope {
    /// Fails on an empty secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> CryptoResult<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(CryptoError::InvalidParameter(
                "Integrity secret must not be empty".to_string(),
            ));
        }
        Ok(Self { secret })
    }

    fn mac(&self) -> CryptoResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))
    }

    /// Lower-case hex HMAC-SHA256 of `plaintext`.
    pub fn tag(&self, plaintext: &str) -> CryptoResult<String> {
        let mut mac = self.mac()?;
        mac.update(plaintext.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Frame `plaintext` with its length and tag.
    pub fn wrap(&self, plaintext: &str) -> CryptoResult<String> {
        let tag = self.tag(plaintext)?;
        Ok(format!(
            "{}{}{}{}{}",
            plaintext.len(),
            ENVELOPE_LENGTH_SEPARATOR,
            plaintext,
            ENVELOPE_TAG_SEPARATOR,
            tag
        ))
    }

    /// Split a frame and check its tag in constant time.
    ///
    /// Never fails: a malformed frame or a mismatching tag both come back as
    /// `tag_ok = false`. When the frame cannot be parsed at all the whole
    /// input is returned as the plaintext.
    pub fn unwrap(&self, combined: &str) -> Unwrapped {
        let Some((plaintext, tag)) = split_frame(combined) else {
            return Unwrapped {
                plaintext: combined.to_string(),
                tag_ok: false,
            };
        };

        let tag_ok = self.verify_tag(plaintext, tag);
        Unwrapped {
            plaintext: plaintext.to_string(),
            tag_ok,
        }
    }

    /// [`unwrap`](Self::unwrap), turning a bad tag into
    /// [`CryptoError::IntegrityCheckFailed`].
    pub fn open(&self, combined: &str) -> CryptoResult<String> {
        let unwrapped = self.unwrap(combined);
        if !unwrapped.tag_ok {
            return Err(CryptoError::IntegrityCheckFailed);
        }
        Ok(unwrapped.plaintext)
    }

    fn verify_tag(&self, plaintext: &str, tag: &str) -> bool {
        // Only the canonical encoding is accepted; upper-case hex is a different frame.
        if tag.len() != ENVELOPE_TAG_HEX_LEN
            || !tag.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return false;
        }
        let Ok(expected) = hex::decode(tag) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(plaintext.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

fn split_frame(combined: &str) -> Option<(&str, &str)> {
    let (len, rest) = combined.split_once(ENVELOPE_LENGTH_SEPARATOR)?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let len: usize = len.parse().ok()?;
    if !rest.is_char_boundary(len) {
        return None;
    }
    let (plaintext, trailer) = rest.split_at(len);
    let tag = trailer.strip_prefix(ENVELOPE_TAG_SEPARATOR)?;
    Some((plaintext, tag))
}
