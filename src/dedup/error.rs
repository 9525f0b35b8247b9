//! Error type surfaced by the deduplication engine and reference counter.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::scanner::ScanError;
use crate::storage::StorageAdapterError;

/// Union error type for every dedup engine / reference counter operation,
/// carrying the taxonomy kinds from the error handling design.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Bad input: empty payload, missing metadata. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Scanner verdict unsafe, or mime/extension/magic-bytes/image limits
    /// rejected the upload.
    #[error("upload rejected: {0}")]
    Rejected(String),

    /// Token bucket denied the call.
    #[error("rate limited")]
    RateLimited(#[from] crate::rate_limit::RateLimitError),

    /// Missing file or reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant I1 violation observed at read time.
    #[error("data inconsistency detected: {0}")]
    Inconsistent(String),

    /// Primary, all backups, and all mirrors denied or failed for this op.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller's cancellation handle was already cancelled, or was
    /// cancelled mid-flight. Not retried and never triggers cleanup retries.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<CatalogError> for DedupError {
    fn from(err: CatalogError) -> Self {
        if err.is_transient() {
            Self::StorageUnavailable(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<StorageAdapterError> for DedupError {
    fn from(err: StorageAdapterError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<ScanError> for DedupError {
    fn from(err: ScanError) -> Self {
        Self::Rejected(err.to_string())
    }
}
