//! Keyed integrity tag over vault file metadata.
//!
//! The tag is a BLAKE2b-256 MAC, under a sub-key of the master key, over a
//! canonical encoding of `{version, kdf, cipher}`. The encoding is
//! length-prefixed and fixed-order so it does not depend on JSON layout.

use blake2::digest::consts::U32;
use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::Blake2bMac;
use subtle::ConstantTimeEq;

use crate::aead::CipherPayload;
use crate::codec::VaultFile;
use crate::kdf::KdfParams;
use crate::keys::MasterKey;
use credvault_common::{Error, Result};

/// Size of the integrity tag in bytes.
pub const MAC_SIZE: usize = 32;

const INTEGRITY_LABEL: &[u8] = b"credvault/integrity/v1";
const KEY_CHECK_LABEL: &[u8] = b"credvault/key-check/v1";

/// Compute the integrity tag for `file`. Its own `integrity` field is ignored.
pub fn tag(file: &VaultFile, key: &MasterKey) -> Result<Vec<u8>> {
    let canonical = canonical_bytes(file.version, &file.kdf, &file.cipher);
    keyed_digest(key, INTEGRITY_LABEL, &canonical)
}

/// Check `file.integrity` against a freshly computed tag.
///
/// Returns `false` when the tag is absent. Comparison is constant-time.
pub fn verify(file: &VaultFile, key: &MasterKey) -> Result<bool> {
    let Some(stored) = file.integrity.as_deref() else {
        return Ok(false);
    };
    let expected = tag(file, key)?;
    Ok(bool::from(expected.as_slice().ct_eq(stored)))
}

/// Commitment to `key`, stored with the KDF parameters.
///
/// Lets a reader tell "this password derives a different key" apart from
/// "the file was altered", which the integrity tag alone cannot do.
pub fn key_check(key: &MasterKey) -> Result<Vec<u8>> {
    keyed_digest(key, KEY_CHECK_LABEL, &[])
}

/// Constant-time comparison of a stored key check against `key`.
pub fn verify_key_check(key: &MasterKey, check: &[u8]) -> Result<bool> {
    let expected = key_check(key)?;
    Ok(bool::from(expected.as_slice().ct_eq(check)))
}

fn keyed_digest(key: &MasterKey, label: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let subkey = key.derive_subkey(label)?;
    let mut mac = <Blake2bMac<U32> as KeyInit>::new_from_slice(subkey.as_bytes())
        .map_err(|e| Error::Crypto(format!("MAC initialization failed: {}", e)))?;
    mac.update(message);
    Ok(mac.finalize_fixed().to_vec())
}

fn canonical_bytes(version: u32, kdf: &KdfParams, cipher: &CipherPayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + cipher.data.len());
    out.extend_from_slice(INTEGRITY_LABEL);
    out.extend_from_slice(&version.to_be_bytes());

    put_field(&mut out, kdf.salt.as_bytes());
    out.extend_from_slice(&kdf.memory_cost.to_be_bytes());
    out.extend_from_slice(&kdf.time_cost.to_be_bytes());
    out.extend_from_slice(&kdf.parallelism.to_be_bytes());
    out.extend_from_slice(&kdf.key_length.to_be_bytes());
    match &kdf.check {
        Some(check) => {
            out.push(1);
            put_field(&mut out, check);
        }
        None => out.push(0),
    }

    put_field(&mut out, &cipher.nonce);
    put_field(&mut out, &cipher.data);
    put_field(&mut out, &cipher.tag);
    out
}

fn put_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::KdfProfile;
    use crate::keys::KEY_LENGTH;

    fn sample_file() -> VaultFile {
        VaultFile {
            version: 2,
            kdf: KdfParams::generate(&KdfProfile::minimal()),
            cipher: CipherPayload {
                nonce: vec![1u8; 24],
                data: b"ciphertext".to_vec(),
                tag: vec![2u8; 16],
            },
            integrity: None,
        }
    }

    #[test]
    fn test_tag_verifies() {
        let key = MasterKey::from_bytes([5u8; KEY_LENGTH]);
        let mut file = sample_file();
        file.integrity = Some(tag(&file, &key).unwrap());

        assert_eq!(file.integrity.as_ref().unwrap().len(), MAC_SIZE);
        assert!(verify(&file, &key).unwrap());
    }

    #[test]
    fn test_tag_ignores_existing_integrity_field() {
        let key = MasterKey::from_bytes([5u8; KEY_LENGTH]);
        let mut file = sample_file();
        let before = tag(&file, &key).unwrap();
        file.integrity = Some(vec![0u8; MAC_SIZE]);

        assert_eq!(tag(&file, &key).unwrap(), before);
    }

    #[test]
    fn test_missing_tag_does_not_verify() {
        let key = MasterKey::from_bytes([5u8; KEY_LENGTH]);
        assert!(!verify(&sample_file(), &key).unwrap());
    }

    #[test]
    fn test_any_covered_field_change_breaks_tag() {
        let key = MasterKey::from_bytes([5u8; KEY_LENGTH]);
        let mut file = sample_file();
        file.integrity = Some(tag(&file, &key).unwrap());

        let mut versioned = file.clone();
        versioned.version = 3;
        assert!(!verify(&versioned, &key).unwrap());

        let mut costed = file.clone();
        costed.kdf.time_cost += 1;
        assert!(!verify(&costed, &key).unwrap());

        let mut data = file.clone();
        data.cipher.data[0] ^= 0x80;
        assert!(!verify(&data, &key).unwrap());

        let mut truncated = file.clone();
        truncated.integrity.as_mut().unwrap().pop();
        assert!(!verify(&truncated, &key).unwrap());
    }

    #[test]
    fn test_wrong_key_does_not_verify() {
        let mut file = sample_file();
        file.integrity = Some(tag(&file, &MasterKey::from_bytes([5u8; KEY_LENGTH])).unwrap());

        assert!(!verify(&file, &MasterKey::from_bytes([6u8; KEY_LENGTH])).unwrap());
    }

    #[test]
    fn test_key_check() {
        let key = MasterKey::from_bytes([9u8; KEY_LENGTH]);
        let check = key_check(&key).unwrap();

        assert!(verify_key_check(&key, &check).unwrap());
        assert!(!verify_key_check(&MasterKey::from_bytes([8u8; KEY_LENGTH]), &check).unwrap());
    }
}
