//! Request/response shapes for the deduplication engine's external surface.

use crate::catalog::{AttachmentFile, AttachmentReference};

/// Caller-supplied metadata for [`super::DeduplicationEngine::process_upload`].
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    /// Domain entity type this attachment belongs to.
    pub entity_type: String,
    /// Domain entity id this attachment belongs to.
    pub entity_id: String,
    /// Filename as uploaded.
    pub filename: String,
    /// Id of the user performing the upload.
    pub uploader_id: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Optional tag set.
    pub tags: Option<Vec<String>>,
}

/// Result of a successful [`super::DeduplicationEngine::process_upload`] call.
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// Content hash of the uploaded payload.
    pub hash: String,
    /// Id of the newly created reference.
    pub reference_id: String,
    /// Size of the payload in bytes.
    pub size: u64,
    /// Whether this upload matched existing content (no blob written).
    pub deduplicated: bool,
    /// Bytes saved by deduplication (`size` when deduplicated, else 0).
    pub saved_bytes: u64,
    /// The file record this upload resolved to.
    pub file: AttachmentFile,
    /// The reference record created for this upload.
    pub reference: AttachmentReference,
    /// Opaque storage path of the backing blob.
    pub storage_path: String,
}

/// Aggregate dedup effectiveness counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeduplicationStats {
    /// Distinct content hashes stored.
    pub total_files: i64,
    /// Total logical references across all files.
    pub total_references: i64,
    /// Bytes actually stored on disk.
    pub total_bytes_stored: i64,
    /// Bytes that would have been stored without dedup.
    pub total_bytes_logical: i64,
}

impl DeduplicationStats {
    /// Bytes saved by deduplication (`logical - stored`).
    #[must_use]
    pub fn bytes_saved(&self) -> i64 {
        self.total_bytes_logical - self.total_bytes_stored
    }

    /// Fraction of logical bytes saved by dedup, in `[0, 1]`.
    #[must_use]
    pub fn dedup_ratio(&self) -> f64 {
        if self.total_bytes_logical == 0 {
            0.0
        } else {
            self.bytes_saved() as f64 / self.total_bytes_logical as f64
        }
    }
}
