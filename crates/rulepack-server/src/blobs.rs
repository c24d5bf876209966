//! Content-addressed archive storage: `<data>/blobs/<sha256>`

use rulepack_core::utils::is_sha256_hex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("blobs"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, sha256: &str) -> Result<PathBuf> {
        if !is_sha256_hex(sha256) {
            return Err(ApiError::bad_request(format!(
                "'{}' is not a sha256 digest",
                sha256
            )));
        }
        Ok(self.root.join(sha256.to_ascii_lowercase()))
    }

    /// Store `bytes` under their digest; storing the same blob twice is a no-op
    pub async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(sha256)?;
        if tokio::fs::try_exists(&path).await? {
            debug!("Blob {} already stored", sha256);
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.root).await?;

        let temp = self.root.join(format!(".{}.partial", sha256));
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &path).await?;
        debug!("Stored blob {} ({} bytes)", sha256, bytes.len());
        Ok(())
    }

    pub async fn get(&self, sha256: &str) -> Result<Vec<u8>> {
        let path = self.path(sha256)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ApiError::not_found(format!("blob {}", sha256)))
            },
            Err(e) => Err(e.into()),
        }
    }
}
