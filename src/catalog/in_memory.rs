//! In-memory `MetadataCatalog` fake, for fast dedup-engine/orchestrator unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::error::CatalogError;
use super::models::{AttachmentFile, AttachmentReference, EndpointHealthSample, FileListFilter, NewReference, StorageStats};
use super::{MetadataCatalog, Result};

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Default)]
struct State {
    files: HashMap<String, AttachmentFile>,
    references: HashMap<String, AttachmentReference>,
    health: Vec<EndpointHealthSample>,
}

/// An in-process, `Mutex`-guarded [`MetadataCatalog`] used only under tests.
#[derive(Default)]
pub struct InMemoryMetadataCatalog {
    state: Mutex<State>,
}

impl InMemoryMetadataCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCatalog for InMemoryMetadataCatalog {
    async fn get_file(&self, hash: &str) -> Result<Option<AttachmentFile>> {
        Ok(self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).files.get(hash).cloned())
    }

    async fn create_file(&self, file: &AttachmentFile) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.files.contains_key(&file.hash) {
            return Err(CatalogError::FileAlreadyExists { hash: file.hash.clone() });
        }
        state.files.insert(file.hash.clone(), file.clone());
        Ok(())
    }

    async fn update_file(&self, file: &AttachmentFile) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = state.files.get_mut(&file.hash) {
            existing.last_accessed_at = file.last_accessed_at;
        }
        Ok(())
    }

    async fn delete_file(&self, hash: &str) -> Result<()> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).files.remove(hash);
        Ok(())
    }

    async fn get_reference(&self, id: &str) -> Result<Option<AttachmentReference>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .references
            .get(id)
            .cloned())
    }

    async fn create_reference(&self, reference: &NewReference) -> Result<AttachmentReference> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let created = AttachmentReference {
            id: reference.id.clone(),
            file_hash: reference.file_hash.clone(),
            entity_type: reference.entity_type.clone(),
            entity_id: reference.entity_id.clone(),
            filename: reference.filename.clone(),
            uploader_id: reference.uploader_id.clone(),
            description: reference.description.clone(),
            tags: reference.tags.as_ref().map(|tags| tags.join(",")),
            created_at: now_unix(),
        };
        state.references.insert(reference.id.clone(), created.clone());
        if let Some(file) = state.files.get_mut(&reference.file_hash) {
            file.ref_count += 1;
        }
        Ok(created)
    }

    async fn delete_reference(&self, id: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(reference) = state.references.remove(id) else {
            return Ok(None);
        };
        if let Some(file) = state.files.get_mut(&reference.file_hash) {
            file.ref_count = (file.ref_count - 1).max(0);
        }
        Ok(Some(reference.file_hash))
    }

    async fn list_references_by_hash(&self, hash: &str) -> Result<Vec<AttachmentReference>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .references
            .values()
            .filter(|reference| reference.file_hash == hash)
            .cloned()
            .collect())
    }

    async fn increment_ref_count(&self, hash: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let file = state
            .files
            .get_mut(hash)
            .ok_or_else(|| CatalogError::FileNotFound { hash: hash.to_string() })?;
        file.ref_count += 1;
        Ok(file.ref_count)
    }

    async fn decrement_ref_count(&self, hash: &str) -> Result<i64> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let file = state
            .files
            .get_mut(hash)
            .ok_or_else(|| CatalogError::FileNotFound { hash: hash.to_string() })?;
        file.ref_count = (file.ref_count - 1).max(0);
        Ok(file.ref_count)
    }

    async fn set_ref_count(&self, hash: &str, ref_count: i64) -> Result<()> {
        if let Some(file) = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).files.get_mut(hash) {
            file.ref_count = ref_count;
        }
        Ok(())
    }

    async fn get_orphaned_files(&self, retention_days: i64) -> Result<Vec<AttachmentFile>> {
        let cutoff = now_unix() - retention_days * 86_400;
        Ok(self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .files
            .values()
            .filter(|file| file.ref_count == 0 && file.last_accessed_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn delete_orphaned_files(&self, hashes: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut deleted = 0u64;
        for hash in hashes {
            if state.files.get(hash).is_some_and(|file| file.ref_count == 0) {
                state.files.remove(hash);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn list_files(&self, filter: &FileListFilter) -> Result<Vec<AttachmentFile>> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut files: Vec<_> = state
            .files
            .values()
            .filter(|file| filter.mime_type.as_ref().is_none_or(|mime| &file.mime_type == mime))
            .cloned()
            .collect();
        files.sort_by_key(|file| file.created_at);
        let offset = filter.offset.max(0) as usize;
        let limit = if filter.limit <= 0 { files.len() } else { filter.limit as usize };
        Ok(files.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_storage_stats(&self) -> Result<StorageStats> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let total_files = state.files.len() as i64;
        let total_references = state.files.values().map(|file| file.ref_count).sum();
        let total_bytes_stored = state.files.values().map(|file| file.size_bytes).sum();
        let total_bytes_logical = state.files.values().map(|file| file.size_bytes * file.ref_count).sum();
        Ok(StorageStats {
            total_files,
            total_references,
            total_bytes_stored,
            total_bytes_logical,
        })
    }

    async fn record_health(&self, sample: &EndpointHealthSample) -> Result<()> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).health.push(sample.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_file(hash: &str) -> AttachmentFile {
        let now = now_unix();
        AttachmentFile {
            hash: hash.to_string(),
            size_bytes: 10,
            mime_type: "text/plain".to_string(),
            extension: ".txt".to_string(),
            storage_primary: format!("/blobs/{hash}"),
            ref_count: 0,
            created_at: now,
            last_accessed_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_file_and_reference_lifecycle() {
        let catalog = InMemoryMetadataCatalog::new();
        catalog.create_file(&sample_file("h1")).await.unwrap();
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
        assert_eq!(catalog.get_file("h1").await.unwrap().unwrap().ref_count, 1);
        catalog.delete_reference("r1").await.unwrap();
        assert_eq!(catalog.get_file("h1").await.unwrap().unwrap().ref_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_file_rejected() {
        let catalog = InMemoryMetadataCatalog::new();
        catalog.create_file(&sample_file("h1")).await.unwrap();
        assert!(catalog.create_file(&sample_file("h1")).await.is_err());
    }
}
