//! `SQLite`-backed metadata catalog, via `sqlx`.

use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

use crate::db::Database;

use super::error::CatalogError;
use super::models::{AttachmentFile, AttachmentReference, EndpointHealthSample, FileListFilter, NewReference, StorageStats};
use super::{MetadataCatalog, Result};

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn join_tags(tags: &Option<Vec<String>>) -> Option<String> {
    tags.as_ref().map(|tags| tags.join(","))
}

/// Metadata catalog backed by the shared `SQLite` [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteMetadataCatalog {
    db: Database,
}

impl SqliteMetadataCatalog {
    /// Wraps an already-migrated [`Database`] handle.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataCatalog for SqliteMetadataCatalog {
    #[instrument(skip(self))]
    async fn get_file(&self, hash: &str) -> Result<Option<AttachmentFile>> {
        let file = sqlx::query_as::<_, AttachmentFile>("SELECT * FROM attachment_files WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(file)
    }

    #[instrument(skip(self, file), fields(hash = %file.hash))]
    async fn create_file(&self, file: &AttachmentFile) -> Result<()> {
        let result = sqlx::query(
            r"INSERT INTO attachment_files
                (hash, size_bytes, mime_type, extension, storage_primary, ref_count, created_at, last_accessed_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(hash) DO NOTHING",
        )
        .bind(&file.hash)
        .bind(file.size_bytes)
        .bind(&file.mime_type)
        .bind(&file.extension)
        .bind(&file.storage_primary)
        .bind(file.ref_count)
        .bind(file.created_at)
        .bind(file.last_accessed_at)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::FileAlreadyExists { hash: file.hash.clone() });
        }
        Ok(())
    }

    #[instrument(skip(self, file), fields(hash = %file.hash))]
    async fn update_file(&self, file: &AttachmentFile) -> Result<()> {
        sqlx::query("UPDATE attachment_files SET last_accessed_at = ? WHERE hash = ?")
            .bind(file.last_accessed_at)
            .bind(&file.hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_file(&self, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM attachment_files WHERE hash = ?")
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_reference(&self, id: &str) -> Result<Option<AttachmentReference>> {
        let reference = sqlx::query_as::<_, AttachmentReference>("SELECT * FROM attachment_references WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(reference)
    }

    #[instrument(skip(self, reference), fields(id = %reference.id, hash = %reference.file_hash))]
    async fn create_reference(&self, reference: &NewReference) -> Result<AttachmentReference> {
        let created_at = now_unix();
        let tags = join_tags(&reference.tags);
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r"INSERT INTO attachment_references
                (id, file_hash, entity_type, entity_id, filename, uploader_id, description, tags, created_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&reference.id)
        .bind(&reference.file_hash)
        .bind(&reference.entity_type)
        .bind(&reference.entity_id)
        .bind(&reference.filename)
        .bind(&reference.uploader_id)
        .bind(&reference.description)
        .bind(&tags)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE attachment_files SET ref_count = ref_count + 1 WHERE hash = ?")
            .bind(&reference.file_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(AttachmentReference {
            id: reference.id.clone(),
            file_hash: reference.file_hash.clone(),
            entity_type: reference.entity_type.clone(),
            entity_id: reference.entity_id.clone(),
            filename: reference.filename.clone(),
            uploader_id: reference.uploader_id.clone(),
            description: reference.description.clone(),
            tags,
            created_at,
        })
    }

    #[instrument(skip(self))]
    async fn delete_reference(&self, id: &str) -> Result<Option<String>> {
        let mut tx = self.db.pool().begin().await?;

        let file_hash: Option<String> = sqlx::query("SELECT file_hash FROM attachment_references WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("file_hash"));

        let Some(file_hash) = file_hash else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM attachment_references WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE attachment_files SET ref_count = MAX(ref_count - 1, 0) WHERE hash = ?")
            .bind(&file_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(file_hash))
    }

    #[instrument(skip(self))]
    async fn list_references_by_hash(&self, hash: &str) -> Result<Vec<AttachmentReference>> {
        let refs = sqlx::query_as::<_, AttachmentReference>(
            "SELECT * FROM attachment_references WHERE file_hash = ? ORDER BY created_at",
        )
        .bind(hash)
        .fetch_all(self.db.pool())
        .await?;
        Ok(refs)
    }

    #[instrument(skip(self))]
    async fn increment_ref_count(&self, hash: &str) -> Result<i64> {
        sqlx::query("UPDATE attachment_files SET ref_count = ref_count + 1 WHERE hash = ?")
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        let row = sqlx::query("SELECT ref_count FROM attachment_files WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| CatalogError::FileNotFound { hash: hash.to_string() })?;
        Ok(row.get("ref_count"))
    }

    #[instrument(skip(self))]
    async fn decrement_ref_count(&self, hash: &str) -> Result<i64> {
        sqlx::query("UPDATE attachment_files SET ref_count = MAX(ref_count - 1, 0) WHERE hash = ?")
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        let row = sqlx::query("SELECT ref_count FROM attachment_files WHERE hash = ?")
            .bind(hash)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| CatalogError::FileNotFound { hash: hash.to_string() })?;
        Ok(row.get("ref_count"))
    }

    #[instrument(skip(self))]
    async fn set_ref_count(&self, hash: &str, ref_count: i64) -> Result<()> {
        sqlx::query("UPDATE attachment_files SET ref_count = ? WHERE hash = ?")
            .bind(ref_count)
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_orphaned_files(&self, retention_days: i64) -> Result<Vec<AttachmentFile>> {
        let cutoff = now_unix() - retention_days * 86_400;
        let files = sqlx::query_as::<_, AttachmentFile>(
            "SELECT * FROM attachment_files WHERE ref_count = 0 AND last_accessed_at <= ?",
        )
        .bind(cutoff)
        .fetch_all(self.db.pool())
        .await?;
        Ok(files)
    }

    #[instrument(skip(self, hashes), fields(count = hashes.len()))]
    async fn delete_orphaned_files(&self, hashes: &[String]) -> Result<u64> {
        let mut deleted = 0u64;
        for hash in hashes {
            let result = sqlx::query("DELETE FROM attachment_files WHERE hash = ? AND ref_count = 0")
                .bind(hash)
                .execute(self.db.pool())
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    #[instrument(skip(self, filter))]
    async fn list_files(&self, filter: &FileListFilter) -> Result<Vec<AttachmentFile>> {
        let files = if let Some(mime_type) = &filter.mime_type {
            sqlx::query_as::<_, AttachmentFile>(
                "SELECT * FROM attachment_files WHERE mime_type = ? ORDER BY created_at LIMIT ? OFFSET ?",
            )
            .bind(mime_type)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(self.db.pool())
            .await?
        } else {
            sqlx::query_as::<_, AttachmentFile>("SELECT * FROM attachment_files ORDER BY created_at LIMIT ? OFFSET ?")
                .bind(filter.limit)
                .bind(filter.offset)
                .fetch_all(self.db.pool())
                .await?
        };
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn get_storage_stats(&self) -> Result<StorageStats> {
        let row = sqlx::query(
            r"SELECT
                COUNT(*) AS total_files,
                COALESCE(SUM(ref_count), 0) AS total_references,
                COALESCE(SUM(size_bytes), 0) AS total_bytes_stored,
                COALESCE(SUM(size_bytes * ref_count), 0) AS total_bytes_logical
              FROM attachment_files",
        )
        .fetch_one(self.db.pool())
        .await?;

        Ok(StorageStats {
            total_files: row.get("total_files"),
            total_references: row.get("total_references"),
            total_bytes_stored: row.get("total_bytes_stored"),
            total_bytes_logical: row.get("total_bytes_logical"),
        })
    }

    #[instrument(skip(self, sample), fields(endpoint_id = %sample.endpoint_id))]
    async fn record_health(&self, sample: &EndpointHealthSample) -> Result<()> {
        sqlx::query(
            "INSERT INTO endpoint_health_samples (endpoint_id, check_time, status, error_message) VALUES (?, ?, ?, ?)",
        )
        .bind(&sample.endpoint_id)
        .bind(sample.check_time)
        .bind(&sample.status)
        .bind(&sample.error_message)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
