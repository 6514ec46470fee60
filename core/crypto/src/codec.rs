//! Versioned on-disk vault record.
//!
//! Composes key derivation, authenticated encryption and the integrity tag.
//! Version 2 is the only version written; version 1 (no integrity tag) is
//! still accepted on read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::aead::{self, CipherPayload};
use crate::integrity;
use crate::kdf::{derive_key, KdfParams, KdfProfile, DEFAULT_MAX_MEMORY_KIB};
use crate::keys::MasterKey;
use credvault_common::{Error, Result, SensitiveBytes};

/// Version stamped on every file this codec writes.
pub const CURRENT_VERSION: u32 = 2;

/// Pre-integrity format, accepted on read only.
pub const LEGACY_VERSION: u32 = 1;

/// The sole on-disk representation of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFile {
    pub version: u32,
    pub kdf: KdfParams,
    pub cipher: CipherPayload,
    #[serde(
        default,
        with = "credvault_common::base64_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub integrity: Option<Vec<u8>>,
}

impl VaultFile {
    /// Serialize to pretty JSON bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Encoder/decoder for vault files.
///
/// Holds the process-wide cost profile for new vaults and the memory cap
/// applied to every derivation, including ones driven by a file's own
/// parameters.
#[derive(Debug, Clone, Copy)]
pub struct VaultCodec {
    profile: KdfProfile,
    max_memory_kib: u32,
}

impl VaultCodec {
    /// Create a codec with the given profile and memory cap.
    ///
    /// # Errors
    /// - `Derivation` if the profile itself exceeds the cap
    pub fn new(profile: KdfProfile, max_memory_kib: u32) -> Result<Self> {
        if profile.memory_cost > max_memory_kib {
            return Err(Error::Derivation(format!(
                "Profile memory cost {} KiB exceeds cap of {} KiB",
                profile.memory_cost, max_memory_kib
            )));
        }
        Ok(Self {
            profile,
            max_memory_kib,
        })
    }

    /// Cost profile used for new vaults.
    pub fn profile(&self) -> &KdfProfile {
        &self.profile
    }

    /// Memory cap applied to every derivation.
    pub fn max_memory_kib(&self) -> u32 {
        self.max_memory_kib
    }

    /// Fresh KDF parameters for a new vault.
    pub fn generate_params(&self) -> KdfParams {
        KdfParams::generate(&self.profile)
    }

    /// Derive the key for `params`, enforcing the memory cap.
    pub fn derive(&self, password: &[u8], params: &KdfParams) -> Result<MasterKey> {
        derive_key(password, params, self.max_memory_kib)
    }

    /// Encrypt `data` as a brand-new vault.
    ///
    /// Generates KDF parameters, derives the key, seals the serialized data,
    /// and stamps the current version with an integrity tag.
    pub fn encrypt_new<T: Serialize>(
        &self,
        data: &T,
        password: &[u8],
    ) -> Result<(VaultFile, MasterKey)> {
        let mut params = self.generate_params();
        let key = self.derive(password, &params)?;
        params.check = Some(integrity::key_check(&key)?);

        let file = self.encrypt_with_key(data, &key, &params)?;
        Ok((file, key))
    }

    /// Re-encrypt `data` under an already derived key and its parameters.
    ///
    /// Used for every write after the first; a fresh nonce is drawn each time.
    pub fn encrypt_with_key<T: Serialize>(
        &self,
        data: &T,
        key: &MasterKey,
        params: &KdfParams,
    ) -> Result<VaultFile> {
        let plaintext = SensitiveBytes::new(
            serde_json::to_vec(data).map_err(|e| Error::Serialization(e.to_string()))?,
        );
        let cipher = aead::seal(plaintext.as_bytes(), key)?;

        let mut file = VaultFile {
            version: CURRENT_VERSION,
            kdf: params.clone(),
            cipher,
            integrity: None,
        };
        file.integrity = Some(integrity::tag(&file, key)?);
        Ok(file)
    }

    /// Derive the key from the file's parameters and decrypt.
    ///
    /// # Errors
    /// - `Authentication` for a wrong password
    /// - `Integrity` for a missing or mismatching tag on version >= 2
    /// - `Derivation` if the file's cost exceeds the cap
    /// - `Serialization` for an unsupported version or undecodable plaintext
    pub fn decrypt<T: DeserializeOwned>(
        &self,
        file: &VaultFile,
        password: &[u8],
    ) -> Result<(T, MasterKey)> {
        check_version(file)?;
        let key = self.derive(password, &file.kdf)?;
        let data = self.decrypt_with_key(file, &key)?;
        Ok((data, key))
    }

    /// Decrypt with an already derived key.
    ///
    /// Verification happens before the cipher is opened.
    pub fn decrypt_with_key<T: DeserializeOwned>(
        &self,
        file: &VaultFile,
        key: &MasterKey,
    ) -> Result<T> {
        check_version(file)?;

        if let Some(check) = file.kdf.check.as_deref() {
            if !integrity::verify_key_check(key, check)? {
                return Err(Error::Authentication);
            }
        }

        if file.version >= 2 {
            if file.integrity.is_none() {
                return Err(Error::Integrity(
                    "integrity tag missing from versioned vault".to_string(),
                ));
            }
            if !integrity::verify(file, key)? {
                return Err(Error::Integrity("integrity tag mismatch".to_string()));
            }
        }

        let plaintext = SensitiveBytes::new(aead::open(&file.cipher, key)?);
        serde_json::from_slice(plaintext.as_bytes())
            .map_err(|e| Error::Serialization(format!("Vault payload unreadable: {}", e)))
    }
}

impl Default for VaultCodec {
    fn default() -> Self {
        Self {
            profile: KdfProfile::default(),
            max_memory_kib: DEFAULT_MAX_MEMORY_KIB,
        }
    }
}

fn check_version(file: &VaultFile) -> Result<()> {
    if file.version < LEGACY_VERSION || file.version > CURRENT_VERSION {
        return Err(Error::Serialization(format!(
            "Unsupported vault version: {}",
            file.version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn codec() -> VaultCodec {
        VaultCodec::new(KdfProfile::minimal(), DEFAULT_MAX_MEMORY_KIB).unwrap()
    }

    fn sample() -> serde_json::Value {
        json!({"entries": [{"site": "Example", "password": "p"}]})
    }

    /// Build a version 1 file the way the pre-integrity writer did.
    fn legacy_file(data: &serde_json::Value, password: &[u8]) -> VaultFile {
        let codec = codec();
        let params = codec.generate_params();
        let key = codec.derive(password, &params).unwrap();
        let cipher = aead::seal(&serde_json::to_vec(data).unwrap(), &key).unwrap();
        VaultFile {
            version: LEGACY_VERSION,
            kdf: params,
            cipher,
            integrity: None,
        }
    }

    #[test]
    fn test_new_files_are_current_and_tagged() {
        let (file, _) = codec().encrypt_new(&sample(), b"hunter2pass").unwrap();

        assert_eq!(file.version, CURRENT_VERSION);
        assert!(file.integrity.is_some());
        assert!(file.kdf.check.is_some());
    }

    #[test]
    fn test_wrong_password_is_authentication_error() {
        let (file, _) = codec().encrypt_new(&sample(), b"right").unwrap();

        let result: Result<(serde_json::Value, _)> = codec().decrypt(&file, b"wrong");
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_missing_integrity_is_integrity_error() {
        let (mut file, _) = codec().encrypt_new(&sample(), b"pw").unwrap();
        file.integrity = None;

        let result: Result<(serde_json::Value, _)> = codec().decrypt(&file, b"pw");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_altered_ciphertext_is_integrity_error() {
        let (file, _) = codec().encrypt_new(&sample(), b"pw").unwrap();

        for i in 0..file.cipher.data.len() {
            let mut tampered = file.clone();
            tampered.cipher.data[i] ^= 0x01;
            let result: Result<(serde_json::Value, _)> = codec().decrypt(&tampered, b"pw");
            assert!(matches!(result, Err(Error::Integrity(_))), "byte {}", i);
        }
    }

    #[test]
    fn test_tampered_check_without_integrity_tag_still_rejected() {
        let (mut file, _) = codec().encrypt_new(&sample(), b"pw").unwrap();
        file.kdf.check = None;

        let result: Result<(serde_json::Value, _)> = codec().decrypt(&file, b"pw");
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn test_legacy_file_decrypts_without_tag() {
        let file = legacy_file(&sample(), b"old-password");

        let (data, _): (serde_json::Value, _) = codec().decrypt(&file, b"old-password").unwrap();
        assert_eq!(data, sample());
    }

    #[test]
    fn test_legacy_file_wrong_password() {
        let file = legacy_file(&sample(), b"old-password");

        let result: Result<(serde_json::Value, _)> = codec().decrypt(&file, b"nope");
        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let (mut file, _) = codec().encrypt_new(&sample(), b"pw").unwrap();
        file.version = 7;

        let result: Result<(serde_json::Value, _)> = codec().decrypt(&file, b"pw");
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_reencrypt_keeps_params_and_changes_nonce() {
        let codec = codec();
        let (file, key) = codec.encrypt_new(&sample(), b"pw").unwrap();

        let again = codec.encrypt_with_key(&sample(), &key, &file.kdf).unwrap();
        assert_eq!(again.kdf, file.kdf);
        assert_ne!(again.cipher.nonce, file.cipher.nonce);

        let (data, _): (serde_json::Value, _) = codec.decrypt(&again, b"pw").unwrap();
        assert_eq!(data, sample());
    }

    #[test]
    fn test_file_cost_above_cap_is_derivation_error() {
        let (mut file, _) = codec().encrypt_new(&sample(), b"pw").unwrap();
        file.kdf.memory_cost = DEFAULT_MAX_MEMORY_KIB * 4;

        let result: Result<(serde_json::Value, _)> = codec().decrypt(&file, b"pw");
        assert!(matches!(result, Err(Error::Derivation(_))));
    }

    #[test]
    fn test_profile_above_cap_rejected() {
        assert!(VaultCodec::new(KdfProfile::sensitive(), 1024).is_err());
    }

    #[test]
    fn test_json_layout() {
        let (file, _) = codec().encrypt_new(&sample(), b"pw").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&file.to_bytes().unwrap()).unwrap();

        assert_eq!(value["version"], 2);
        assert!(value["kdf"]["salt"].is_string());
        assert!(value["kdf"]["memoryCost"].is_number());
        assert!(value["kdf"]["keyLength"].is_number());
        assert!(value["cipher"]["nonce"].is_string());
        assert!(value["cipher"]["data"].is_string());
        assert!(value["cipher"]["tag"].is_string());
        assert!(value["integrity"].is_string());

        let restored = VaultFile::from_bytes(&file.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, file);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_roundtrip(
            password in "[ -~]{1,24}",
            entries in proptest::collection::vec("[a-zA-Z0-9 ]{0,16}", 0..5),
        ) {
            let codec = codec();
            let data = json!({ "entries": entries });
            let (file, _) = codec.encrypt_new(&data, password.as_bytes()).unwrap();
            let (restored, _): (serde_json::Value, _) =
                codec.decrypt(&file, password.as_bytes()).unwrap();
            prop_assert_eq!(restored, data);
        }

        #[test]
        fn prop_wrong_password_fails(
            password in "[a-z]{1,12}",
            suffix in "[A-Z]{1,4}",
        ) {
            let codec = codec();
            let (file, _) = codec.encrypt_new(&sample(), password.as_bytes()).unwrap();
            let wrong = format!("{}{}", password, suffix);
            let result: Result<(serde_json::Value, _)> = codec.decrypt(&file, wrong.as_bytes());
            prop_assert!(matches!(result, Err(Error::Authentication)));
        }
    }
}
