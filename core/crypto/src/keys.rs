//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use blake2::digest::consts::U32;
use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::Blake2bMac;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use credvault_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of freshly generated salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Key derived from the master password.
///
/// Encrypts the vault payload directly; purpose-specific sub-keys for the
/// integrity tag and the key check are derived from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive a purpose-bound sub-key.
    ///
    /// Keyed BLAKE2b over the label, so distinct labels give independent keys.
    pub fn derive_subkey(&self, label: &[u8]) -> Result<SubKey> {
        let mut mac = <Blake2bMac<U32> as KeyInit>::new_from_slice(&self.key)
            .map_err(|e| Error::Crypto(format!("Sub-key derivation failed: {}", e)))?;
        mac.update(label);
        let result = mac.finalize_fixed();

        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        Ok(SubKey { key: derived })
    }

    /// Constant-time equality against another key.
    pub fn ct_eq(&self, other: &MasterKey) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Sub-key bound to a single purpose (integrity tag, key check).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SubKey {
    key: [u8; KEY_LENGTH],
}

impl SubKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubKey([REDACTED])")
    }
}

/// Salt for key derivation, stored as base64 in the vault file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "credvault_common::base64_bytes")] Vec<u8>);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subkeys_are_label_bound() {
        let master = MasterKey::from_bytes([1u8; KEY_LENGTH]);

        let a1 = master.derive_subkey(b"integrity").unwrap();
        let a2 = master.derive_subkey(b"integrity").unwrap();
        let b = master.derive_subkey(b"key-check").unwrap();

        assert_eq!(a1.as_bytes(), a2.as_bytes());
        assert_ne!(a1.as_bytes(), b.as_bytes());
        assert_ne!(a1.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_master_key_ct_eq() {
        let a = MasterKey::from_bytes([7u8; KEY_LENGTH]);
        let b = MasterKey::from_bytes([7u8; KEY_LENGTH]);
        let c = MasterKey::from_bytes([8u8; KEY_LENGTH]);

        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        assert_eq!(salt1.as_bytes().len(), SALT_LENGTH);
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let master = MasterKey::from_bytes([0xAB; KEY_LENGTH]);
        assert_eq!(format!("{:?}", master), "MasterKey([REDACTED])");
    }
}
