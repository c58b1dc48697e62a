use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// File contents on local disk, one file per id.
#[derive(Debug)]
pub struct BlobStorage {
    dir: PathBuf,
}

impl BlobStorage {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::IoError(e.to_string()))?;
        tracing::info!("Blob storage at {}", dir.display());
        Ok(Self { dir })
    }

    fn path(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(StoreError::NotFound("File"));
        }
        Ok(self.dir.join(id))
    }

    pub async fn write(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        tokio::fs::write(self.path(id)?, bytes)
            .await
            .map_err(|e| StoreError::IoError(e.to_string()))
    }

    pub async fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(self.path(id)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound("File")),
            Err(e) => Err(StoreError::IoError(e.to_string())),
        }
    }

    /// Remove a blob. Missing blobs are not an error.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::IoError(e.to_string())),
        }
    }
}
