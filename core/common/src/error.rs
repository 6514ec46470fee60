//! Common error types for credvault.

use thiserror::Error;

/// Message shown to unauthenticated callers for any credential or file failure.
pub const GENERIC_UNLOCK_FAILURE: &str = "invalid credentials or vault";

/// Top-level error type for credvault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key derivation failed or the requested cost exceeds the memory cap.
    #[error("Key derivation error: {0}")]
    Derivation(String),

    /// The authentication tag did not verify (wrong key or corrupted ciphertext).
    #[error("Authentication failed")]
    Authentication,

    /// Integrity tag mismatch, or tag missing where it is mandatory.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// No vault exists and creation was not requested.
    #[error("Vault not found")]
    VaultNotFound,

    /// No active session.
    #[error("Vault is locked")]
    Locked,

    /// Presented token does not match the active session.
    #[error("Invalid session token")]
    InvalidSession,

    /// Unknown entry id.
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Primitive failure while sealing.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Too many unlock attempts for this client.
    #[error("Too many attempts; retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },
}

impl Error {
    /// Stable, machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Derivation(_) => "derivation_error",
            Error::Authentication => "authentication_error",
            Error::Integrity(_) => "integrity_error",
            Error::VaultNotFound => "vault_not_found",
            Error::Locked => "locked",
            Error::InvalidSession => "invalid_session",
            Error::EntryNotFound(_) => "entry_not_found",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::Crypto(_) => "crypto_error",
            Error::Throttled { .. } => "throttled",
        }
    }

    /// Whether this is a credential or vault-file failure.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Error::Authentication | Error::Integrity(_))
    }

    /// Rendering for a caller that has not authenticated.
    ///
    /// Authentication and integrity failures share one message so a caller
    /// cannot tell a wrong password from a tampered file.
    pub fn public_message(&self) -> String {
        if self.is_credential_failure() {
            GENERIC_UNLOCK_FAILURE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
