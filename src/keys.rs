//! Master key ownership and decoding.
//!
//! The master key is the single secret behind every record in every
//! collection. It arrives as text (an environment value), is decoded here
//! exactly once, handed to [`Cipher`](crate::cipher::Cipher), and zeroised
//! on drop.
//!
//! Accepted encodings:
//!
//! ```text
//! 64 hex characters                -> 32 bytes
//! base64, standard or URL-safe      -> must decode to 32 bytes
//!         alphabet, padded or not
//! ```

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::engine::GeneralPurpose;
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;
use crate::error::{PhivaultError, Result};

/// Key used when no key is configured outside production. Every byte is
/// `0x01`, which is also what `AQEBAQEB...` decodes to.
const DEV_FALLBACK_KEY: [u8; KEY_LEN] = [1u8; KEY_LEN];

const KEY_ENCODINGS: [&GeneralPurpose; 4] =
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD];

/// A master key.
///
/// - Not `Clone`. Cannot be duplicated without explicit conversion.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

/// Where a loaded master key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Decoded from configuration.
    Configured,
    /// The fixed development key. Never chosen when a key is configured.
    DevelopmentFallback,
}

impl MasterKey {
    /// Construct a `MasterKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode a configured key: 64-char hex first, then base64 in any of
    /// the accepted alphabets and paddings.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PhivaultError::InvalidKey("empty value"));
        }

        if raw.len() == 2 * KEY_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            let mut bytes = [0u8; KEY_LEN];
            hex::decode_to_slice(raw, &mut bytes)
                .map_err(|_| PhivaultError::InvalidKey("bad hex"))?;
            return Ok(Self { bytes });
        }

        let mut decoded = KEY_ENCODINGS
            .iter()
            .find_map(|engine| engine.decode(raw).ok())
            .ok_or(PhivaultError::InvalidKey("expected 32 bytes base64 or 64-char hex"))?;
        if decoded.len() != KEY_LEN {
            decoded.zeroize();
            return Err(PhivaultError::InvalidKey(
                "expected 32 bytes base64 or 64-char hex",
            ));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// The fixed development key.
    pub(crate) fn development_fallback() -> Self {
        Self {
            bytes: DEV_FALLBACK_KEY,
        }
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
