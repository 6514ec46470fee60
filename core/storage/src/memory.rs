//! In-memory vault store for testing.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::provider::VaultStore;
use credvault_common::{Error, Result};
use credvault_crypto::VaultFile;

/// In-memory vault store.
///
/// Useful for testing and development. The record is lost on drop. Writes
/// can be made to fail on demand to exercise persistence error paths.
#[derive(Default)]
pub struct MemoryStore {
    file: RwLock<Option<VaultFile>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `file`.
    pub fn with_file(file: VaultFile) -> Self {
        Self {
            file: RwLock::new(Some(file)),
            ..Self::default()
        }
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored record.
    pub fn snapshot(&self) -> Option<VaultFile> {
        self.file
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot().is_some())
    }

    async fn read(&self) -> Result<VaultFile> {
        self.snapshot().ok_or(Error::VaultNotFound)
    }

    async fn write(&self, file: &VaultFile) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        *self
            .file
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(file.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
