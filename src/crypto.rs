//! Low-level cryptographic operations.
//!
//! This module is the only place in the crate that imports `ring`. The
//! [`Cipher`](crate::cipher::Cipher) service performs encryption, decryption
//! and chain hashing exclusively through the functions exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **Tag**: 128-bit, kept apart from the ciphertext
//! - **Chain hash**: SHA-256
//! - **Key size**: 256 bits (32 bytes)

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest::{self, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{PhivaultError, Result};

/// The AEAD algorithm used throughout phivault.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Size of a master key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Raw output of one sealing operation.
pub(crate) struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Build the AEAD key once; the key schedule is reused for every call.
pub(crate) fn aead_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes)
        .map_err(|_| PhivaultError::InvalidKey("rejected by AES-256-GCM"))?;
    Ok(LessSafeKey::new(unbound))
}

/// Generate a cryptographically secure random nonce.
///
/// A fresh nonce is drawn for every encryption call. There is no nonce
/// caching or counter-based generation.
fn generate_nonce(rng: &SystemRandom) -> Result<[u8; NONCE_LEN]> {
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf)
        .map_err(|_| PhivaultError::RandomnessFailure)?;
    Ok(buf)
}

/// Encrypt a plaintext payload using AES-256-GCM.
///
/// The nonce, ciphertext and tag come back as three separate values so they
/// can be persisted as separate fields.
pub(crate) fn encrypt(key: &LessSafeKey, rng: &SystemRandom, plaintext: &[u8]) -> Result<Sealed> {
    let nonce = generate_nonce(rng)?;
    let mut ciphertext = plaintext.to_vec();

    let tag = key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| PhivaultError::EncryptionFailure)?;

    let tag: [u8; TAG_LEN] = tag
        .as_ref()
        .try_into()
        .map_err(|_| PhivaultError::EncryptionFailure)?;

    Ok(Sealed {
        nonce,
        ciphertext,
        tag,
    })
}

/// Decrypt a ciphertext using AES-256-GCM.
///
/// If the key is wrong or the nonce, ciphertext or tag has been tampered
/// with, the GCM authentication check fails and this function returns an
/// error. The caller receives no partial plaintext.
pub(crate) fn decrypt(
    key: &LessSafeKey,
    nonce: [u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>> {
    // `open_in_place` expects the tag appended to the ciphertext.
    let mut payload = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    payload.extend_from_slice(ciphertext);
    payload.extend_from_slice(tag);

    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut payload,
        )
        .map_err(|_| PhivaultError::DecryptionFailure)?;

    Ok(plaintext.to_vec())
}

/// SHA-256 over the given parts, fed in order with no separator. Lowercase hex.
pub(crate) fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut ctx = digest::Context::new(&SHA256);
    for part in parts {
        ctx.update(part);
    }
    hex::encode(ctx.finish())
}

/// Generate a cryptographically secure random key.
pub(crate) fn generate_random_key() -> Result<[u8; KEY_LEN]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key)
        .map_err(|_| PhivaultError::RandomnessFailure)?;
    Ok(key)
}
