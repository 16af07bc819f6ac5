//! The symmetric cipher service.
//!
//! A [`Cipher`] is built once from a [`MasterKey`] by the composition root
//! and shared behind an `Arc`. It never changes after construction, so it is
//! used from any task without locking. Tests build isolated instances with
//! distinct keys.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use ring::aead::LessSafeKey;
use ring::rand::SystemRandom;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, NONCE_LEN, TAG_LEN};
use crate::error::{PhivaultError, Result};
use crate::keys::{KeySource, MasterKey};

/// Text-encoded AEAD output. Every field is standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    #[serde(rename = "iv")]
    pub nonce: String,
    #[serde(rename = "tag")]
    pub auth_tag: String,
}

/// AES-256-GCM encryption under one master key, plus the ledger hash link.
pub struct Cipher {
    key: LessSafeKey,
    rng: SystemRandom,
    source: KeySource,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build a cipher from a configured key. The `MasterKey` is consumed and
    /// zeroised once the AEAD key schedule exists.
    pub fn new(master: MasterKey) -> Result<Self> {
        Self::with_source(master, KeySource::Configured)
    }

    pub(crate) fn with_source(master: MasterKey, source: KeySource) -> Result<Self> {
        let key = crypto::aead_key(master.as_bytes())?;
        Ok(Self {
            key,
            rng: SystemRandom::new(),
            source,
        })
    }

    /// Whether this cipher runs on the development fallback key.
    pub fn key_source(&self) -> KeySource {
        self.source
    }

    /// Encrypt a UTF-8 plaintext with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload> {
        let sealed = crypto::encrypt(&self.key, &self.rng, plaintext.as_bytes())?;
        Ok(EncryptedPayload {
            ciphertext: B64.encode(&sealed.ciphertext),
            nonce: B64.encode(sealed.nonce),
            auth_tag: B64.encode(sealed.tag),
        })
    }

    /// Decrypt a payload produced by [`Cipher::encrypt`].
    ///
    /// Undecodable fields give `MalformedPayload`; a failed tag check or a
    /// non-UTF-8 plaintext gives `DecryptionFailure`.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<String> {
        let nonce: [u8; NONCE_LEN] = decode_fixed(&payload.nonce, "nonce")?;
        let tag: [u8; TAG_LEN] = decode_fixed(&payload.auth_tag, "auth tag")?;
        let ciphertext = B64
            .decode(&payload.ciphertext)
            .map_err(|_| PhivaultError::MalformedPayload("ciphertext is not base64"))?;

        let plaintext = crypto::decrypt(&self.key, nonce, &ciphertext, &tag)?;
        String::from_utf8(plaintext).map_err(|_| PhivaultError::DecryptionFailure)
    }

    /// `H(prev_hash, ciphertext, ts, action, resource_id)`: SHA-256 over the
    /// fields in this fixed order, lowercase hex.
    pub fn hash_link(
        &self,
        prev_hash: &str,
        ciphertext: &str,
        ts: &str,
        action: &str,
        resource_id: &str,
    ) -> String {
        hash_link(prev_hash, ciphertext, ts, action, resource_id)
    }
}

/// Free-standing form of [`Cipher::hash_link`]; the link does not depend on
/// the key.
pub fn hash_link(
    prev_hash: &str,
    ciphertext: &str,
    ts: &str,
    action: &str,
    resource_id: &str,
) -> String {
    crypto::sha256_hex(&[
        prev_hash.as_bytes(),
        ciphertext.as_bytes(),
        ts.as_bytes(),
        action.as_bytes(),
        resource_id.as_bytes(),
    ])
}

fn decode_fixed<const N: usize>(field: &str, what: &'static str) -> Result<[u8; N]> {
    let bytes = B64
        .decode(field)
        .map_err(|_| PhivaultError::MalformedPayload(what))?;
    bytes
        .try_into()
        .map_err(|_| PhivaultError::MalformedPayload(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> Cipher {
        Cipher::new(MasterKey::from_bytes([byte; 32])).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let c = cipher(1);
        for text in ["", "a", "{\"id\":\"a\",\"val\":1}", "ünïcødé ✓"] {
            let sealed = c.encrypt(text).unwrap();
            assert_eq!(c.decrypt(&sealed).unwrap(), text);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let c = cipher(1);
        let a = c.encrypt("same").unwrap();
        let b = c.encrypt("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_bad_base64_is_malformed_not_integrity() {
        let c = cipher(1);
        let mut sealed = c.encrypt("x").unwrap();
        sealed.nonce = "%%%".into();
        assert!(matches!(
            c.decrypt(&sealed),
            Err(PhivaultError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_other_key_cannot_decrypt() {
        let sealed = cipher(1).encrypt("secret").unwrap();
        assert!(matches!(
            cipher(2).decrypt(&sealed),
            Err(PhivaultError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_hash_link_is_deterministic_and_ordered() {
        let a = hash_link("", "ct", "2026-01-01T00:00:00.000Z", "write", "r1");
        let b = hash_link("", "ct", "2026-01-01T00:00:00.000Z", "write", "r1");
        let swapped = hash_link("", "ct", "2026-01-01T00:00:00.000Z", "r1", "write");
        assert_eq!(a, b);
        assert_ne!(a, swapped);
        assert_eq!(a.len(), 64);
        assert_eq!(cipher(9).hash_link("", "ct", "2026-01-01T00:00:00.000Z", "write", "r1"), a);
    }

    #[test]
    fn test_payload_uses_iv_and_tag_field_names() {
        let sealed = cipher(1).encrypt("x").unwrap();
        let json = serde_json::to_value(&sealed).unwrap();
        assert!(json.get("iv").is_some());
        assert!(json.get("tag").is_some());
        assert!(json.get("nonce").is_none());
    }
}
