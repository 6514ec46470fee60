//! Cryptographic primitives for credvault.
//!
//! This module provides:
//! - Key derivation using Argon2id, bounded by an operator memory cap
//! - Authenticated encryption using XChaCha20-Poly1305
//! - A keyed BLAKE2b integrity tag over vault file metadata
//! - The versioned vault record composing the three
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time comparison for every tag and key check

pub mod aead;
pub mod codec;
pub mod integrity;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal, CipherPayload};
pub use codec::{VaultCodec, VaultFile, CURRENT_VERSION, LEGACY_VERSION};
pub use kdf::{derive_key, KdfParams, KdfProfile, DEFAULT_MAX_MEMORY_KIB};
pub use keys::{MasterKey, Salt};
