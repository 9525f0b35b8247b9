//! Persisted entity shapes for the metadata catalog.

use serde::{Deserialize, Serialize};

/// One row per distinct content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttachmentFile {
    /// Content digest (lowercase hex), primary key.
    pub hash: String,
    /// Size of the blob in bytes.
    pub size_bytes: i64,
    /// MIME type recorded at upload time.
    pub mime_type: String,
    /// File extension, including the leading dot.
    pub extension: String,
    /// Opaque path returned by the storage orchestrator.
    pub storage_primary: String,
    /// Number of live references to this content.
    pub ref_count: i64,
    /// Unix timestamp (seconds) the file record was created.
    pub created_at: i64,
    /// Unix timestamp (seconds) the file was last accessed.
    pub last_accessed_at: i64,
}

/// One row per logical attachment (a hash may back many references).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttachmentReference {
    /// Primary key.
    pub id: String,
    /// Hash of the backing [`AttachmentFile`].
    pub file_hash: String,
    /// Domain entity type this attachment belongs to.
    pub entity_type: String,
    /// Domain entity id this attachment belongs to.
    pub entity_id: String,
    /// Filename as uploaded.
    pub filename: String,
    /// Id of the user who created this reference.
    pub uploader_id: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Optional comma-joined tag set.
    pub tags: Option<String>,
    /// Unix timestamp (seconds) the reference was created.
    pub created_at: i64,
}

/// Appended by the orchestrator's health-check loop on a confirmed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EndpointHealthSample {
    /// Identifier of the endpoint this sample is for.
    pub endpoint_id: String,
    /// Unix timestamp (seconds) the check was performed.
    pub check_time: i64,
    /// `"healthy"` or `"unhealthy"`.
    pub status: String,
    /// Error text, when `status == "unhealthy"`.
    pub error_message: Option<String>,
}

/// Input to [`super::MetadataCatalog::create_reference`].
#[derive(Debug, Clone)]
pub struct NewReference {
    /// Primary key for the new reference.
    pub id: String,
    /// Hash of the backing file.
    pub file_hash: String,
    /// Domain entity type this attachment belongs to.
    pub entity_type: String,
    /// Domain entity id this attachment belongs to.
    pub entity_id: String,
    /// Filename as uploaded.
    pub filename: String,
    /// Id of the user who created this reference.
    pub uploader_id: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Optional tag set, joined with commas for storage.
    pub tags: Option<Vec<String>>,
}

/// Filter for [`super::MetadataCatalog::list_files`].
#[derive(Debug, Clone, Default)]
pub struct FileListFilter {
    /// Restrict to this MIME type, if set.
    pub mime_type: Option<String>,
    /// Number of rows to skip.
    pub offset: i64,
    /// Maximum rows to return.
    pub limit: i64,
}

/// Aggregate counters returned by [`super::MetadataCatalog::get_storage_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Distinct content hashes stored.
    pub total_files: i64,
    /// Total logical references across all files.
    pub total_references: i64,
    /// Sum of `size_bytes` across all files (actual bytes stored).
    pub total_bytes_stored: i64,
    /// Sum of `size_bytes * ref_count` (bytes that would be stored without dedup).
    pub total_bytes_logical: i64,
}
