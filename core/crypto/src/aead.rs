//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};
use serde::{Deserialize, Serialize};

use crate::keys::MasterKey;
use credvault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Sealed payload as stored in the vault file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherPayload {
    #[serde(with = "credvault_common::base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "credvault_common::base64_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "credvault_common::base64_bytes")]
    pub tag: Vec<u8>,
}

/// Encrypt plaintext under `key` with a freshly generated nonce.
///
/// # Postconditions
/// - `nonce` is random and never reused under the same key
/// - `data` has the plaintext's length, `tag` is TAG_SIZE bytes
///
/// # Errors
/// - `Crypto` if the primitive fails
pub fn seal(plaintext: &[u8], key: &MasterKey) -> Result<CipherPayload> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(CipherPayload {
        nonce: nonce.to_vec(),
        data: sealed,
        tag,
    })
}

/// Decrypt and authenticate a payload.
///
/// # Errors
/// - `Authentication` for a wrong key, a corrupted payload, or malformed
///   nonce/tag lengths. All of these take the same path and produce the
///   same error.
pub fn open(payload: &CipherPayload, key: &MasterKey) -> Result<Vec<u8>> {
    if payload.nonce.len() != NONCE_SIZE || payload.tag.len() != TAG_SIZE {
        return Err(Error::Authentication);
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = GenericArray::from_slice(&payload.nonce);

    let mut sealed = Vec::with_capacity(payload.data.len() + TAG_SIZE);
    sealed.extend_from_slice(&payload.data);
    sealed.extend_from_slice(&payload.tag);

    cipher
        .decrypt(nonce, sealed.as_slice())
        .map_err(|_| Error::Authentication)
}
