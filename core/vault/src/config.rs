//! Runtime configuration for the vault core.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::throttle::ThrottleConfig;
use credvault_common::{Error, Result};
use credvault_crypto::{KdfProfile, VaultCodec, DEFAULT_MAX_MEMORY_KIB};

/// Vault file name inside the data directory.
pub const VAULT_FILENAME: &str = "vault.json";

/// Application directory name under the platform data directory.
pub const APP_DIRNAME: &str = "credvault";

/// Core configuration, read from JSON. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Location of the vault file.
    pub vault_path: PathBuf,
    /// Inactivity before auto-lock, in seconds. 0 disables auto-lock.
    pub idle_timeout_secs: u64,
    /// Cost profile for newly created vaults.
    pub kdf: KdfProfile,
    /// Ceiling on derivation memory, in KiB.
    pub max_kdf_memory_kib: u32,
    /// Unlock throttle.
    pub throttle: ThrottleConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            vault_path: default_vault_path(),
            idle_timeout_secs: 300,
            kdf: KdfProfile::default(),
            max_kdf_memory_kib: DEFAULT_MAX_MEMORY_KIB,
            throttle: ThrottleConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Inactivity timeout, `None` when auto-lock is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Codec for this configuration's profile and memory cap.
    pub fn codec(&self) -> Result<VaultCodec> {
        VaultCodec::new(self.kdf, self.max_kdf_memory_kib)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        if self.vault_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("vault_path cannot be empty".to_string()));
        }
        self.codec()?;
        self.throttle.validate()
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&json)
    }
}

/// `<platform data dir>/credvault/vault.json`, or `./vault.json` without one.
pub fn default_vault_path() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join(APP_DIRNAME).join(VAULT_FILENAME),
        None => PathBuf::from(VAULT_FILENAME),
    }
}
