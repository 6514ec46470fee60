//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Its memory cost
//! is also its peak working set, which lets an operator cap it.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use credvault_common::{Error, Result};

/// Default ceiling on derivation memory, in KiB (256 MiB).
pub const DEFAULT_MAX_MEMORY_KIB: u32 = 262_144;

/// Argon2id cost profile, without a salt.
///
/// One profile is chosen per process; every new vault gets it together with a
/// fresh salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfProfile {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
    /// Derived key length in bytes.
    pub key_length: u32,
}

impl KdfProfile {
    /// Create parameters suitable for interactive use.
    ///
    /// Targets roughly half a second to a second per derivation.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
            key_length: KEY_LENGTH as u32,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
            key_length: KEY_LENGTH as u32,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
            key_length: KEY_LENGTH as u32,
        }
    }

    /// Smallest legal cost. Only for tests; offers no brute-force resistance.
    pub fn minimal() -> Self {
        Self {
            memory_cost: 256,
            time_cost: 1,
            parallelism: 1,
            key_length: KEY_LENGTH as u32,
        }
    }

    /// Resolve a profile by name: "interactive", "moderate", "sensitive", "minimal".
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "interactive" => Some(Self::interactive()),
            "moderate" => Some(Self::moderate()),
            "sensitive" => Some(Self::sensitive()),
            "minimal" => Some(Self::minimal()),
            _ => None,
        }
    }
}

impl Default for KdfProfile {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Parameters for one vault's Argon2id derivation.
///
/// Generated once when the vault is created and never changed for that
/// vault. `check` is a commitment to the derived key, filled in by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub salt: Salt,
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub key_length: u32,
    #[serde(
        default,
        with = "credvault_common::base64_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub check: Option<Vec<u8>>,
}

impl KdfParams {
    /// Fresh salt plus the given cost profile.
    pub fn generate(profile: &KdfProfile) -> Self {
        Self {
            salt: Salt::generate(),
            memory_cost: profile.memory_cost,
            time_cost: profile.time_cost,
            parallelism: profile.parallelism,
            key_length: profile.key_length,
            check: None,
        }
    }

    /// Cost portion of these parameters.
    pub fn profile(&self) -> KdfProfile {
        KdfProfile {
            memory_cost: self.memory_cost,
            time_cost: self.time_cost,
            parallelism: self.parallelism,
            key_length: self.key_length,
        }
    }
}

/// Derive a master key from a password using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params.memory_cost` must not exceed `max_memory_kib`
///
/// # Postconditions
/// - Returns a MasterKey derived from the password
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidInput` if password is empty
/// - `Derivation` if the cost exceeds the cap, the key length is not 32,
///   or Argon2id rejects the parameters
///
/// # Security
/// - Password is not stored or logged
/// - The cap is checked before any memory is allocated
pub fn derive_key(password: &[u8], params: &KdfParams, max_memory_kib: u32) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    if params.key_length as usize != KEY_LENGTH {
        return Err(Error::Derivation(format!(
            "Unsupported key length: expected {}, got {}",
            KEY_LENGTH, params.key_length
        )));
    }

    if params.memory_cost > max_memory_kib {
        return Err(Error::Derivation(format!(
            "Requested memory cost {} KiB exceeds cap of {} KiB",
            params.memory_cost, max_memory_kib
        )));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Derivation(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, params.salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Derivation(format!("Key derivation failed: {}", e)))?;

    let key = MasterKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}

/// Verify that a password produces the expected key, in constant time.
pub fn verify_password(
    password: &[u8],
    params: &KdfParams,
    max_memory_kib: u32,
    expected: &MasterKey,
) -> Result<bool> {
    let derived = derive_key(password, params, max_memory_kib)?;
    Ok(derived.ct_eq(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_salt(byte: u8) -> KdfParams {
        let mut params = KdfParams::generate(&KdfProfile::minimal());
        params.salt = Salt::from_bytes(vec![byte; 32]);
        params
    }

    #[test]
    fn test_derive_key_deterministic() {
        let params = params_with_salt(42);

        let key1 = derive_key(b"test-password-123", &params, DEFAULT_MAX_MEMORY_KIB).unwrap();
        let key2 = derive_key(b"test-password-123", &params, DEFAULT_MAX_MEMORY_KIB).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let key1 = derive_key(b"pw", &params_with_salt(1), DEFAULT_MAX_MEMORY_KIB).unwrap();
        let key2 = derive_key(b"pw", &params_with_salt(2), DEFAULT_MAX_MEMORY_KIB).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let params = params_with_salt(42);

        let key1 = derive_key(b"password1", &params, DEFAULT_MAX_MEMORY_KIB).unwrap();
        let key2 = derive_key(b"password2", &params, DEFAULT_MAX_MEMORY_KIB).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let params = params_with_salt(42);

        assert!(matches!(
            derive_key(b"", &params, DEFAULT_MAX_MEMORY_KIB),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_memory_cap_enforced() {
        let params = KdfParams::generate(&KdfProfile::sensitive());

        let result = derive_key(b"password", &params, 65536);
        assert!(matches!(result, Err(Error::Derivation(_))));
    }

    #[test]
    fn test_unsupported_key_length() {
        let mut params = params_with_salt(3);
        params.key_length = 16;

        assert!(matches!(
            derive_key(b"password", &params, DEFAULT_MAX_MEMORY_KIB),
            Err(Error::Derivation(_))
        ));
    }

    #[test]
    fn test_invalid_argon2_params() {
        let mut params = params_with_salt(3);
        params.time_cost = 0;

        assert!(matches!(
            derive_key(b"password", &params, DEFAULT_MAX_MEMORY_KIB),
            Err(Error::Derivation(_))
        ));
    }

    #[test]
    fn test_verify_password() {
        let params = params_with_salt(99);

        let key = derive_key(b"secure-password", &params, DEFAULT_MAX_MEMORY_KIB).unwrap();
        assert!(verify_password(b"secure-password", &params, DEFAULT_MAX_MEMORY_KIB, &key).unwrap());
        assert!(!verify_password(b"wrong-password", &params, DEFAULT_MAX_MEMORY_KIB, &key).unwrap());
    }

    #[test]
    fn test_profiles_fit_default_cap() {
        for name in ["interactive", "moderate", "sensitive", "minimal"] {
            let profile = KdfProfile::from_name(name).unwrap();
            assert!(profile.memory_cost <= DEFAULT_MAX_MEMORY_KIB, "{}", name);
        }
        assert!(KdfProfile::from_name("extreme").is_none());
    }
}
