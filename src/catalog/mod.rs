//! Metadata catalog: the interface the core consumes for persisted
//! file/reference/health state, plus the one concrete `SQLite` implementation.

mod error;
mod models;
mod sqlite;

#[cfg(test)]
mod in_memory;

pub use error::{CatalogError, DbErrorKind};
pub use models::{AttachmentFile, AttachmentReference, EndpointHealthSample, FileListFilter, NewReference, StorageStats};
pub use sqlite::SqliteMetadataCatalog;

#[cfg(test)]
pub use in_memory::InMemoryMetadataCatalog;

use async_trait::async_trait;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Persists file records (one per content hash) and reference records (one
/// per logical attachment), plus endpoint health samples. `IncrementRefCount`
/// and `DecrementRefCount` are the only code paths that mutate `ref_count`;
/// `create_reference`/`delete_reference` call them internally in the same
/// transaction.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Looks up a file record by content hash.
    async fn get_file(&self, hash: &str) -> Result<Option<AttachmentFile>>;

    /// Creates a file record. Idempotent on hash: a concurrent second
    /// writer for the same hash gets [`CatalogError::FileAlreadyExists`],
    /// which callers treat as a dedup hit rather than a hard failure.
    async fn create_file(&self, file: &AttachmentFile) -> Result<()>;

    /// Overwrites mutable fields (`last_accessed_at`) of a file record.
    async fn update_file(&self, file: &AttachmentFile) -> Result<()>;

    /// Hard-deletes a file record. Used by orphan reclamation after the
    /// blob has been removed from storage.
    async fn delete_file(&self, hash: &str) -> Result<()>;

    /// Looks up a reference record by id.
    async fn get_reference(&self, id: &str) -> Result<Option<AttachmentReference>>;

    /// Creates a reference record and atomically increments the backing
    /// file's `ref_count` in the same transaction.
    async fn create_reference(&self, reference: &NewReference) -> Result<AttachmentReference>;

    /// Deletes a reference record and atomically decrements the backing
    /// file's `ref_count` in the same transaction. Returns the hash of the
    /// file that was referenced, or `None` if the reference did not exist.
    async fn delete_reference(&self, id: &str) -> Result<Option<String>>;

    /// Lists every live reference for a given hash.
    async fn list_references_by_hash(&self, hash: &str) -> Result<Vec<AttachmentReference>>;

    /// Atomically increments `ref_count` for `hash`. Exposed directly for
    /// [`crate::dedup::ReferenceCounter::repair_integrity`]; ordinary
    /// reference creation goes through [`Self::create_reference`].
    async fn increment_ref_count(&self, hash: &str) -> Result<i64>;

    /// Atomically decrements `ref_count` for `hash`, floored at zero.
    async fn decrement_ref_count(&self, hash: &str) -> Result<i64>;

    /// Sets `ref_count` to an absolute value. Used by `RepairIntegrity`.
    async fn set_ref_count(&self, hash: &str, ref_count: i64) -> Result<()>;

    /// Returns files eligible for reclamation: `ref_count = 0` and
    /// `now - last_accessed_at >= retention_days`.
    async fn get_orphaned_files(&self, retention_days: i64) -> Result<Vec<AttachmentFile>>;

    /// Hard-deletes the given file records. Used after physical blob deletion.
    async fn delete_orphaned_files(&self, hashes: &[String]) -> Result<u64>;

    /// Returns a page of file records matching `filter`.
    async fn list_files(&self, filter: &FileListFilter) -> Result<Vec<AttachmentFile>>;

    /// Returns aggregate storage counters.
    async fn get_storage_stats(&self) -> Result<StorageStats>;

    /// Appends an endpoint health sample.
    async fn record_health(&self, sample: &EndpointHealthSample) -> Result<()>;
}
