//! Vault store trait definition.

use async_trait::async_trait;

use credvault_common::Result;
use credvault_crypto::VaultFile;

/// Persistence for the single vault record.
///
/// Implementations must make `write` atomic: after a failed or interrupted
/// write, `read` returns either the previous record or the new one, never a
/// mix or a truncation.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Short name for logs (e.g., "file", "memory").
    fn name(&self) -> &str;

    /// Check whether a vault record exists.
    async fn exists(&self) -> Result<bool>;

    /// Read the stored record.
    ///
    /// # Errors
    /// - `VaultNotFound` if no record exists
    /// - `Io` on storage failure
    /// - `Serialization` if the stored bytes are not a vault record
    async fn read(&self) -> Result<VaultFile>;

    /// Replace the stored record.
    ///
    /// # Postconditions
    /// - On `Ok`, the new record is durable
    /// - On `Err`, callers must not assume any part of it was written
    async fn write(&self, file: &VaultFile) -> Result<()>;
}
