//! Local filesystem vault store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::VaultStore;
use credvault_common::{Error, Result};
use credvault_crypto::VaultFile;

/// Owner read/write only.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Local filesystem store.
///
/// Writes go to a temporary file in the target's directory, are flushed and
/// synced, then renamed over the target. A crash at any point leaves either
/// the previous complete file or the new complete file at `path`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store for the vault file at `path`.
    ///
    /// Nothing is touched on disk until the first write; the parent
    /// directory is created then if absent.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Location of the vault file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Sibling temporary path, unique per write.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vault");
        self.parent_dir()
            .join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
    }

    /// Write `bytes` to a fresh temporary file and sync it to disk.
    ///
    /// Returns the temporary path; the target is not touched.
    pub(crate) async fn stage(&self, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(self.parent_dir()).await?;

        let temp = self.temp_path();
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let result = async {
            let mut file = options.open(&temp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            discard_temp(&temp).await;
            return Err(Error::Io(e));
        }
        Ok(temp)
    }

    /// Rename a staged file over the target and restrict its permissions.
    pub(crate) async fn commit(&self, temp: &Path) -> Result<()> {
        if let Err(e) = fs::rename(temp, &self.path).await {
            discard_temp(temp).await;
            return Err(Error::Io(e));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(FILE_MODE)).await?;

            // Persist the rename itself.
            fs::File::open(self.parent_dir()).await?.sync_all().await?;
        }

        Ok(())
    }
}

async fn discard_temp(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %temp.display(), error = %e, "Failed to remove temporary vault file");
        }
    }
}

#[async_trait]
impl VaultStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.path).await?)
    }

    async fn read(&self) -> Result<VaultFile> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::VaultNotFound)
            }
            Err(e) => return Err(Error::Io(e)),
        };
        debug!(path = %self.path.display(), size = bytes.len(), "Vault file read");
        VaultFile::from_bytes(&bytes)
    }

    async fn write(&self, file: &VaultFile) -> Result<()> {
        let bytes = file.to_bytes()?;
        let temp = self.stage(&bytes).await?;
        self.commit(&temp).await?;
        debug!(path = %self.path.display(), size = bytes.len(), "Vault file written");
        Ok(())
    }
}
