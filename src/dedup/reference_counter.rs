//! Thin service over the metadata catalog: increments on new reference,
//! decrements on delete, finds and reclaims orphans, verifies and repairs
//! integrity. The reference counter is the only caller of the catalog's
//! atomic `IncrementRefCount`/`DecrementRefCount` primitives outside of
//! `CreateReference`/`DeleteReference` themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::catalog::{FileListFilter, MetadataCatalog};
use crate::storage::StorageOrchestrator;

use super::error::DedupError;

/// A hash whose recorded `ref_count` disagrees with the number of live
/// references actually pointing at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityMismatch {
    /// The affected content hash.
    pub hash: String,
    /// `ref_count` as currently recorded in the catalog.
    pub database_count: i64,
    /// `ref_count` recomputed by scanning references.
    pub actual_count: i64,
}

/// Per-call backoff base for [`ReferenceCounter::atomic_increment`] /
/// [`ReferenceCounter::atomic_decrement`]: `100ms * (attempt + 1)`.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Reference counting and orphan reclamation over a [`MetadataCatalog`]
/// and [`StorageOrchestrator`].
pub struct ReferenceCounter {
    catalog: Arc<dyn MetadataCatalog>,
    orchestrator: Arc<StorageOrchestrator>,
    shutdown: Arc<Notify>,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ReferenceCounter {
    /// Creates a reference counter over the given catalog and orchestrator.
    #[must_use]
    pub fn new(catalog: Arc<dyn MetadataCatalog>, orchestrator: Arc<StorageOrchestrator>) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            orchestrator,
            shutdown: Arc::new(Notify::new()),
            cleanup_task: std::sync::Mutex::new(None),
        })
    }

    /// Atomically increments `ref_count` for `hash`.
    pub async fn increment(&self, hash: &str) -> Result<i64, DedupError> {
        Ok(self.catalog.increment_ref_count(hash).await?)
    }

    /// Atomically decrements `ref_count` for `hash`, floored at zero.
    pub async fn decrement(&self, hash: &str) -> Result<i64, DedupError> {
        Ok(self.catalog.decrement_ref_count(hash).await?)
    }

    /// Wraps [`Self::increment`] with exponential back-off
    /// (`100ms * (attempt + 1)`) for transient catalog errors.
    #[instrument(skip(self))]
    pub async fn atomic_increment(&self, hash: &str, max_retries: u32) -> Result<i64, DedupError> {
        self.with_retry(max_retries, || self.catalog.increment_ref_count(hash)).await
    }

    /// Wraps [`Self::decrement`] with exponential back-off for transient
    /// catalog errors.
    #[instrument(skip(self))]
    pub async fn atomic_decrement(&self, hash: &str, max_retries: u32) -> Result<i64, DedupError> {
        self.with_retry(max_retries, || self.catalog.decrement_ref_count(hash)).await
    }

    async fn with_retry<'a, F, Fut>(&'a self, max_retries: u32, call: F) -> Result<i64, DedupError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = crate::catalog::Result<i64>> + 'a,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    let delay = BACKOFF_BASE * (attempt + 1);
                    warn!(attempt, ?delay, error = %err, "retrying transient catalog error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Returns files with `ref_count = 0` and age since `last_accessed_at`
    /// at or beyond `retention_days`.
    pub async fn find_orphaned(&self, retention_days: i64) -> Result<Vec<crate::catalog::AttachmentFile>, DedupError> {
        Ok(self.catalog.get_orphaned_files(retention_days).await?)
    }

    /// Deletes every orphan's blob (best-effort) then hard-deletes its
    /// catalog record. Returns the number of records deleted.
    #[instrument(skip(self))]
    pub async fn cleanup_orphaned(&self, retention_days: i64) -> Result<u64, DedupError> {
        let orphans = self.find_orphaned(retention_days).await?;
        if orphans.is_empty() {
            return Ok(0);
        }

        let cancel = CancellationToken::new();
        let mut hashes = Vec::with_capacity(orphans.len());
        for orphan in &orphans {
            if let Err(err) = self.orchestrator.delete(&orphan.storage_primary, &cancel).await {
                warn!(hash = %orphan.hash, error = %err, "best-effort blob delete failed during reclamation");
            }
            hashes.push(orphan.hash.clone());
        }

        Ok(self.catalog.delete_orphaned_files(&hashes).await?)
    }

    /// Recomputes `ref_count` for every file by scanning its references,
    /// returning mismatches where the recorded and actual counts differ.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> Result<Vec<IntegrityMismatch>, DedupError> {
        let mut mismatches = Vec::new();
        let mut offset = 0;
        const PAGE: i64 = 500;
        loop {
            let page = self
                .catalog
                .list_files(&FileListFilter { mime_type: None, offset, limit: PAGE })
                .await?;
            if page.is_empty() {
                break;
            }
            for file in &page {
                let actual = self.catalog.list_references_by_hash(&file.hash).await?.len() as i64;
                if actual != file.ref_count {
                    mismatches.push(IntegrityMismatch {
                        hash: file.hash.clone(),
                        database_count: file.ref_count,
                        actual_count: actual,
                    });
                }
            }
            offset += PAGE;
        }
        Ok(mismatches)
    }

    /// Rewrites `ref_count` to the scanned actual count for every mismatch
    /// found by [`Self::verify_integrity`]. Returns the number repaired.
    #[instrument(skip(self))]
    pub async fn repair_integrity(&self) -> Result<u64, DedupError> {
        let mismatches = self.verify_integrity().await?;
        for mismatch in &mismatches {
            self.catalog.set_ref_count(&mismatch.hash, mismatch.actual_count).await?;
        }
        Ok(mismatches.len() as u64)
    }

    /// Starts an owned ticker that runs [`Self::cleanup_orphaned`] on
    /// `interval` until [`Self::close`] is called.
    pub fn schedule_cleanup(self: &Arc<Self>, interval: Duration, retention_days: i64) {
        let counter = self.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        match counter.cleanup_orphaned(retention_days).await {
                            Ok(count) if count > 0 => debug!(count, "reclaimed orphaned attachment files"),
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "orphan reclamation pass failed"),
                        }
                    }
                    () = shutdown.notified() => {
                        debug!("reference counter cleanup ticker shutting down");
                        break;
                    }
                }
            }
        });
        *self.cleanup_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Stops the cleanup ticker, if running, and waits for it to drain. Idempotent.
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        let handle = self.cleanup_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{AttachmentFile, InMemoryMetadataCatalog, NewReference};
    use crate::config::OrchestratorConfig;
    use crate::storage::{EndpointRole, InMemoryAdapter};

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    async fn setup() -> (Arc<ReferenceCounter>, Arc<InMemoryMetadataCatalog>) {
        let catalog = Arc::new(InMemoryMetadataCatalog::new());
        let orchestrator = StorageOrchestrator::new(OrchestratorConfig::default(), None);
        orchestrator
            .register_endpoint("primary", Arc::new(InMemoryAdapter::new("primary")), EndpointRole::Primary)
            .await;
        let counter = ReferenceCounter::new(catalog.clone(), orchestrator);
        (counter, catalog)
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let (counter, catalog) = setup().await;
        catalog
            .create_file(&AttachmentFile {
                hash: "h1".to_string(),
                size_bytes: 10,
                mime_type: "text/plain".to_string(),
                extension: ".txt".to_string(),
                storage_primary: "/blobs/h1".to_string(),
                ref_count: 0,
                created_at: now(),
                last_accessed_at: now(),
            })
            .await
            .unwrap();
        assert_eq!(counter.increment("h1").await.unwrap(), 1);
        assert_eq!(counter.decrement("h1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_orphaned_respects_retention_scenario_2() {
        let (counter, catalog) = setup().await;
        catalog
            .create_file(&AttachmentFile {
                hash: "h1".to_string(),
                size_bytes: 10,
                mime_type: "text/plain".to_string(),
                extension: ".txt".to_string(),
                storage_primary: "/blobs/h1".to_string(),
                ref_count: 0,
                created_at: now() - 10 * 86_400,
                last_accessed_at: now() - 10 * 86_400,
            })
            .await
            .unwrap();
        assert_eq!(counter.find_orphaned(5).await.unwrap().len(), 1);
        assert!(counter.find_orphaned(30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_orphaned_deletes_catalog_record_scenario_2() {
        let (counter, catalog) = setup().await;
        catalog
            .create_file(&AttachmentFile {
                hash: "h1".to_string(),
                size_bytes: 10,
                mime_type: "text/plain".to_string(),
                extension: ".txt".to_string(),
                storage_primary: "/blobs/h1".to_string(),
                ref_count: 0,
                created_at: now() - 10 * 86_400,
                last_accessed_at: now() - 10 * 86_400,
            })
            .await
            .unwrap();
        let deleted = counter.cleanup_orphaned(5).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(catalog.get_file("h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_integrity_detects_mismatch() {
        let (counter, catalog) = setup().await;
        catalog
            .create_file(&AttachmentFile {
                hash: "h1".to_string(),
                size_bytes: 10,
                mime_type: "text/plain".to_string(),
                extension: ".txt".to_string(),
                storage_primary: "/blobs/h1".to_string(),
                ref_count: 5,
                created_at: now(),
                last_accessed_at: now(),
            })
            .await
            .unwrap();
        catalog
            .create_reference(&NewReference {
                id: "r1".to_string(),
                file_hash: "h1".to_string(),
                entity_type: "task".to_string(),
                entity_id: "t1".to_string(),
                filename: "a.txt".to_string(),
                uploader_id: "u1".to_string(),
                description: None,
                tags: None,
            })
            .await
            .unwrap();
        let mismatches = counter.verify_integrity().await.unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].database_count, 6);
        assert_eq!(mismatches[0].actual_count, 1);
    }

    #[tokio::test]
    async fn test_repair_integrity_fixes_mismatch() {
        let (counter, catalog) = setup().await;
        catalog
            .create_file(&AttachmentFile {
                hash: "h1".to_string(),
                size_bytes: 10,
                mime_type: "text/plain".to_string(),
                extension: ".txt".to_string(),
                storage_primary: "/blobs/h1".to_string(),
                ref_count: 99,
                created_at: now(),
                last_accessed_at: now(),
            })
            .await
            .unwrap();
        let repaired = counter.repair_integrity().await.unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(catalog.get_file("h1").await.unwrap().unwrap().ref_count, 0);
    }

    #[tokio::test]
    async fn test_schedule_cleanup_runs_and_closes() {
        let (counter, catalog) = setup().await;
        catalog
            .create_file(&AttachmentFile {
                hash: "h1".to_string(),
                size_bytes: 10,
                mime_type: "text/plain".to_string(),
                extension: ".txt".to_string(),
                storage_primary: "/blobs/h1".to_string(),
                ref_count: 0,
                created_at: now() - 10 * 86_400,
                last_accessed_at: now() - 10 * 86_400,
            })
            .await
            .unwrap();
        counter.schedule_cleanup(Duration::from_millis(20), 5);
        tokio::time::sleep(Duration::from_millis(100)).await;
        counter.close().await;
        assert!(catalog.get_file("h1").await.unwrap().is_none());
    }
}
