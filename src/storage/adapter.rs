//! The byte-level storage contract consumed by the orchestrator.
//!
//! # Object Safety
//!
//! This trait uses `async_trait` so it can be boxed as `Arc<dyn StorageAdapter>`
//! inside the orchestrator's endpoint registry. Rust 2024 native async traits
//! are not object-safe, so `async_trait` is required here.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error surface for a storage adapter call.
#[derive(Debug, Error)]
pub enum StorageAdapterError {
    /// Underlying I/O failure.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// The path does not exist.
    #[error("path not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// The call exceeded its deadline.
    #[error("storage call timed out")]
    Timeout,

    /// The call was cancelled via its [`CancellationToken`].
    #[error("storage call cancelled")]
    Cancelled,

    /// A backend-specific failure not covered by the other variants.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Every registered endpoint denied or failed the call.
    #[error("all registered endpoints failed")]
    AllEndpointsFailed,
}

/// Metadata returned by [`StorageAdapter::get_metadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMetadata {
    /// Size in bytes.
    pub size: u64,
}

/// Byte-level store/retrieve/delete/exists/size/ping/capacity over an
/// opaque `path` string. The core never parses adapter-returned paths.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Writes `content` under a content-derived path and returns it.
    async fn store(
        &self,
        hash: &str,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String, StorageAdapterError>;

    /// Reads back the bytes stored at `path`.
    async fn retrieve(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, StorageAdapterError>;

    /// Deletes `path`. Idempotent: deleting a missing path is not an error.
    async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), StorageAdapterError>;

    /// Whether `path` currently exists.
    async fn exists(&self, path: &str) -> Result<bool, StorageAdapterError>;

    /// Size in bytes of the content at `path`.
    async fn get_size(&self, path: &str) -> Result<u64, StorageAdapterError>;

    /// Full metadata for `path`.
    async fn get_metadata(&self, path: &str) -> Result<StorageMetadata, StorageAdapterError>;

    /// Liveness probe used by the health-check loop.
    async fn ping(&self) -> Result<(), StorageAdapterError>;
}
