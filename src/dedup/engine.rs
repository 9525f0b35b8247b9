//! Deduplication engine: the top-level entry point tying the rate limiter,
//! security scanner, storage orchestrator, and metadata catalog together.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::catalog::{AttachmentFile, MetadataCatalog, NewReference};
use crate::scanner::SecurityScanner;
use crate::storage::StorageOrchestrator;

use super::error::DedupError;
use super::models::{DeduplicationStats, UploadMetadata, UploadResult};

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Ties the scanner, storage orchestrator, and metadata catalog into the
/// single content-addressed upload/download/delete surface.
pub struct DeduplicationEngine {
    catalog: Arc<dyn MetadataCatalog>,
    orchestrator: Arc<StorageOrchestrator>,
    scanner: SecurityScanner,
}

impl DeduplicationEngine {
    /// Builds an engine over the given catalog, orchestrator, and scanner.
    #[must_use]
    pub fn new(catalog: Arc<dyn MetadataCatalog>, orchestrator: Arc<StorageOrchestrator>, scanner: SecurityScanner) -> Self {
        Self { catalog, orchestrator, scanner }
    }

    /// Reads `content` fully, scans it, and either links a new reference to
    /// an existing file (dedup hit) or writes a new blob and file record.
    #[instrument(skip(self, content, metadata), fields(filename = %metadata.filename, size = content.len()))]
    pub async fn process_upload(&self, content: &[u8], metadata: UploadMetadata, cancel: &CancellationToken) -> Result<UploadResult, DedupError> {
        if cancel.is_cancelled() {
            return Err(DedupError::Cancelled);
        }
        if content.is_empty() {
            return Err(DedupError::Validation("upload payload is empty".to_string()));
        }

        let scan = self.scanner.scan(content, &metadata.filename).await;
        if !scan.safe {
            let reasons = scan.errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            return Err(DedupError::Rejected(reasons));
        }

        let hash = hex_sha256(content);
        let size = content.len() as u64;
        let now = now_unix();

        let existing = self.catalog.get_file(&hash).await?;
        let deduplicated = existing.is_some();

        let (file, stored_path) = match existing {
            Some(file) => {
                let path = file.storage_primary.clone();
                (file, path)
            }
            None => {
                let path = self.orchestrator.store(&hash, content, cancel).await?;
                let new_file = AttachmentFile {
                    hash: hash.clone(),
                    size_bytes: size as i64,
                    mime_type: scan.mime_type.clone(),
                    extension: scan.extension.clone(),
                    storage_primary: path.clone(),
                    ref_count: 0,
                    created_at: now,
                    last_accessed_at: now,
                };
                match self.catalog.create_file(&new_file).await {
                    Ok(()) => (new_file, path),
                    Err(err) if matches!(err, crate::catalog::CatalogError::FileAlreadyExists { .. }) => {
                        // Lost a concurrent race to create the same hash: the winner's
                        // blob is authoritative, ours is redundant. I6 rollback.
                        if let Err(delete_err) = self.orchestrator.delete(&path, cancel).await {
                            warn!(error = %delete_err, "failed to roll back redundant blob after concurrent create_file race");
                        }
                        let file = self.catalog.get_file(&hash).await?.ok_or_else(|| {
                            DedupError::Inconsistent(format!("file {hash} vanished after a concurrent create_file race"))
                        })?;
                        let path = file.storage_primary.clone();
                        (file, path)
                    }
                    Err(err) => {
                        if let Err(delete_err) = self.orchestrator.delete(&path, cancel).await {
                            warn!(error = %delete_err, "failed to roll back blob after create_file failure");
                        }
                        return Err(err.into());
                    }
                }
            }
        };

        let reference_input = NewReference {
            id: uuid::Uuid::new_v4().to_string(),
            file_hash: hash.clone(),
            entity_type: metadata.entity_type.clone(),
            entity_id: metadata.entity_id.clone(),
            filename: metadata.filename.clone(),
            uploader_id: metadata.uploader_id.clone(),
            description: metadata.description.clone(),
            tags: metadata.tags.clone(),
        };

        let reference = match self.catalog.create_reference(&reference_input).await {
            Ok(reference) => reference,
            Err(err) => {
                // I6: only roll back the blob/file if this upload itself wrote them.
                if !deduplicated {
                    if let Err(delete_err) = self.orchestrator.delete(&stored_path, cancel).await {
                        warn!(error = %delete_err, "failed to roll back blob after reference creation failure");
                    }
                    if let Err(delete_err) = self.catalog.delete_file(&hash).await {
                        warn!(error = %delete_err, "failed to roll back file record after reference creation failure");
                    }
                }
                return Err(err.into());
            }
        };

        let mut updated_file = file.clone();
        updated_file.last_accessed_at = now;
        if let Err(err) = self.catalog.update_file(&updated_file).await {
            warn!(hash = %hash, error = %err, "best-effort last_accessed_at update failed");
        }

        Ok(UploadResult {
            hash: hash.clone(),
            reference_id: reference.id.clone(),
            size,
            deduplicated,
            saved_bytes: if deduplicated { size } else { 0 },
            file: updated_file,
            reference,
            storage_path: stored_path,
        })
    }

    /// Reads `path` fully from disk and delegates to [`Self::process_upload`].
    pub async fn process_upload_from_path(&self, path: &Path, metadata: UploadMetadata, cancel: &CancellationToken) -> Result<UploadResult, DedupError> {
        let content = tokio::fs::read(path).await.map_err(|err| DedupError::Internal(err.to_string()))?;
        self.process_upload(&content, metadata, cancel).await
    }

    /// Resolves a reference to its blob content plus the reference and file
    /// records it points at.
    #[instrument(skip(self, cancel))]
    pub async fn download_file(
        &self,
        reference_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, crate::catalog::AttachmentReference, AttachmentFile), DedupError> {
        if cancel.is_cancelled() {
            return Err(DedupError::Cancelled);
        }

        let reference = self
            .catalog
            .get_reference(reference_id)
            .await?
            .ok_or_else(|| DedupError::NotFound(format!("reference {reference_id} not found")))?;

        let file = self
            .catalog
            .get_file(&reference.file_hash)
            .await?
            .ok_or_else(|| DedupError::Inconsistent(format!("file {} missing for reference {reference_id}", reference.file_hash)))?;

        let content = self
            .orchestrator
            .retrieve(&file.storage_primary, cancel)
            .await
            .map_err(|err| DedupError::StorageUnavailable(err.to_string()))?;

        let catalog = self.catalog.clone();
        let mut touched = file.clone();
        touched.last_accessed_at = now_unix();
        tokio::spawn(async move {
            if let Err(err) = catalog.update_file(&touched).await {
                warn!(error = %err, "best-effort last_accessed_at update failed after download");
            }
        });

        Ok((content, reference, file))
    }

    /// Deletes a reference (atomically decrementing `ref_count`); marks the
    /// backing file for reclamation if its `ref_count` reaches zero. Physical
    /// blob deletion is deferred to the reclamation pass, not performed here.
    #[instrument(skip(self))]
    pub async fn delete_reference(&self, reference_id: &str) -> Result<(), DedupError> {
        let Some(file_hash) = self.catalog.delete_reference(reference_id).await? else {
            return Err(DedupError::NotFound(format!("reference {reference_id} not found")));
        };

        let Some(file) = self.catalog.get_file(&file_hash).await? else {
            // Already reclaimed by a concurrent cleanup pass.
            return Ok(());
        };

        if file.ref_count == 0 {
            self.catalog.delete_file(&file_hash).await?;
        }

        Ok(())
    }

    /// Checks whether `hash` already has a stored file, returning it when present.
    pub async fn check_deduplication(&self, hash: &str) -> Result<(bool, Option<AttachmentFile>), DedupError> {
        let file = self.catalog.get_file(hash).await?;
        Ok((file.is_some(), file))
    }

    /// Aggregate dedup effectiveness counters, sourced from the catalog.
    pub async fn get_deduplication_stats(&self) -> Result<DeduplicationStats, DedupError> {
        let stats = self.catalog.get_storage_stats().await?;
        Ok(DeduplicationStats {
            total_files: stats.total_files,
            total_references: stats.total_references,
            total_bytes_stored: stats.total_bytes_stored,
            total_bytes_logical: stats.total_bytes_logical,
        })
    }
}

fn hex_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryMetadataCatalog;
    use crate::config::{OrchestratorConfig, ScannerConfig};
    use crate::storage::{EndpointRole, InMemoryAdapter};

    async fn engine() -> DeduplicationEngine {
        let catalog: Arc<dyn MetadataCatalog> = Arc::new(InMemoryMetadataCatalog::new());
        let orchestrator = StorageOrchestrator::new(OrchestratorConfig::default(), None);
        orchestrator
            .register_endpoint("primary", Arc::new(InMemoryAdapter::new("primary")), EndpointRole::Primary)
            .await;
        DeduplicationEngine::new(catalog, orchestrator, SecurityScanner::new(ScannerConfig::default()))
    }

    fn metadata(filename: &str) -> UploadMetadata {
        UploadMetadata {
            entity_type: "task".to_string(),
            entity_id: "t1".to_string(),
            filename: filename.to_string(),
            uploader_id: "u1".to_string(),
            description: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_process_upload_first_write_is_not_deduplicated() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        let result = engine.process_upload(b"hello world", metadata("a.txt"), &cancel).await.unwrap();
        assert!(!result.deduplicated);
        assert_eq!(result.saved_bytes, 0);
    }

    #[tokio::test]
    async fn test_process_upload_second_identical_upload_is_deduplicated_scenario_1() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        let first = engine.process_upload(b"hello world", metadata("a.txt"), &cancel).await.unwrap();
        let second = engine.process_upload(b"hello world", metadata("b.txt"), &cancel).await.unwrap();
        assert_eq!(first.hash, second.hash);
        assert!(second.deduplicated);
        assert_eq!(second.saved_bytes, second.size);
        assert_ne!(first.reference_id, second.reference_id);
    }

    #[tokio::test]
    async fn test_process_upload_no_blob_write_on_dedup_hit_property_p1() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        engine.process_upload(b"same bytes", metadata("a.txt"), &cancel).await.unwrap();
        let primary = engine
            .orchestrator
            .get_endpoint_health()
            .await;
        assert_eq!(primary.len(), 1);
        engine.process_upload(b"same bytes", metadata("b.txt"), &cancel).await.unwrap();
        // Two uploads of identical content must still resolve to one stored file.
        let (hit, file) = engine.check_deduplication(&hex_sha256(b"same bytes")).await.unwrap();
        assert!(hit);
        assert_eq!(file.unwrap().ref_count, 2);
    }

    #[tokio::test]
    async fn test_process_upload_rejects_empty_payload() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        let err = engine.process_upload(b"", metadata("a.txt"), &cancel).await.unwrap_err();
        assert!(matches!(err, DedupError::Validation(_)));
    }

    #[tokio::test]
    async fn test_download_file_roundtrip() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        let uploaded = engine.process_upload(b"payload", metadata("a.txt"), &cancel).await.unwrap();
        let (content, reference, file) = engine.download_file(&uploaded.reference_id, &cancel).await.unwrap();
        assert_eq!(content, b"payload");
        assert_eq!(reference.id, uploaded.reference_id);
        assert_eq!(file.hash, uploaded.hash);
    }

    #[tokio::test]
    async fn test_download_file_missing_reference_is_not_found() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        let err = engine.download_file("missing", &cancel).await.unwrap_err();
        assert!(matches!(err, DedupError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_reference_decrements_and_marks_for_reclamation_scenario_2() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        let a = engine.process_upload(b"shared", metadata("a.txt"), &cancel).await.unwrap();
        let b = engine.process_upload(b"shared", metadata("b.txt"), &cancel).await.unwrap();

        engine.delete_reference(&a.reference_id).await.unwrap();
        let (_, file) = engine.check_deduplication(&a.hash).await.unwrap();
        assert_eq!(file.unwrap().ref_count, 1);

        engine.delete_reference(&b.reference_id).await.unwrap();
        let (_, file) = engine.check_deduplication(&a.hash).await.unwrap();
        assert_eq!(file.unwrap().ref_count, 0);
    }

    #[tokio::test]
    async fn test_delete_reference_missing_is_not_found() {
        let engine = engine().await;
        let err = engine.delete_reference("missing").await.unwrap_err();
        assert!(matches!(err, DedupError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_process_upload_rejected_by_scanner_leaves_no_trace() {
        let catalog: Arc<dyn MetadataCatalog> = Arc::new(InMemoryMetadataCatalog::new());
        let orchestrator = StorageOrchestrator::new(OrchestratorConfig::default(), None);
        orchestrator
            .register_endpoint("primary", Arc::new(InMemoryAdapter::new("primary")), EndpointRole::Primary)
            .await;
        let scanner = SecurityScanner::new(ScannerConfig {
            allowed_extensions: vec![".png".to_string()],
            ..ScannerConfig::default()
        });
        let engine = DeduplicationEngine::new(catalog, orchestrator, scanner);
        let cancel = CancellationToken::new();
        let err = engine.process_upload(b"hello", metadata("a.txt"), &cancel).await.unwrap_err();
        assert!(matches!(err, DedupError::Rejected(_)));
        let (hit, _) = engine.check_deduplication(&hex_sha256(b"hello")).await.unwrap();
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_get_deduplication_stats_reflects_dedup_savings() {
        let engine = engine().await;
        let cancel = CancellationToken::new();
        engine.process_upload(b"shared payload", metadata("a.txt"), &cancel).await.unwrap();
        engine.process_upload(b"shared payload", metadata("b.txt"), &cancel).await.unwrap();
        let stats = engine.get_deduplication_stats().await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_references, 2);
        assert!(stats.bytes_saved() > 0);
    }
}
