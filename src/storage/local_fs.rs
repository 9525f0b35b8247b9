//! Local filesystem storage adapter.
//!
//! Content-addressed path layout: `<root>/<hash[0..2]>/<hash>`, sharding
//! directories by hash prefix so a single directory never holds every blob.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::adapter::{StorageAdapter, StorageAdapterError, StorageMetadata};

/// Stores blobs on the local filesystem under a root directory.
#[derive(Debug, Clone)]
pub struct LocalFsAdapter {
    root: std::path::PathBuf,
}

impl LocalFsAdapter {
    /// Creates an adapter rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<std::path::PathBuf>) -> Result<Self, StorageAdapterError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, hash: &str) -> std::path::PathBuf {
        let prefix = if hash.len() >= 2 { &hash[..2] } else { hash };
        self.root.join(prefix).join(hash)
    }
}

#[async_trait]
impl StorageAdapter for LocalFsAdapter {
    async fn store(
        &self,
        hash: &str,
        content: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<String, StorageAdapterError> {
        let path = self.path_for(hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn retrieve(
        &self,
        path: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, StorageAdapterError> {
        tokio::fs::read(path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StorageAdapterError::NotFound { path: path.to_string() }
            } else {
                StorageAdapterError::Io(err)
            }
        })
    }

    async fn delete(&self, path: &str, _cancel: &CancellationToken) -> Result<(), StorageAdapterError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(_) if !std::path::Path::new(path).exists() => Ok(()),
            Err(err) => Err(StorageAdapterError::Io(err)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageAdapterError> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn get_size(&self, path: &str) -> Result<u64, StorageAdapterError> {
        let meta = tokio::fs::metadata(path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StorageAdapterError::NotFound { path: path.to_string() }
            } else {
                StorageAdapterError::Io(err)
            }
        })?;
        Ok(meta.len())
    }

    async fn get_metadata(&self, path: &str) -> Result<StorageMetadata, StorageAdapterError> {
        Ok(StorageMetadata {
            size: self.get_size(path).await?,
        })
    }

    async fn ping(&self) -> Result<(), StorageAdapterError> {
        tokio::fs::try_exists(&self.root).await?;
        Ok(())
    }
}
