//! In-memory storage adapter used for unit and orchestrator tests.
//!
//! Supports fault injection (forced failures, artificial latency, ping
//! failure) so orchestrator failover and circuit-breaker behavior can be
//! exercised without a real backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::adapter::{StorageAdapter, StorageAdapterError, StorageMetadata};

/// Fault-injection knobs for [`InMemoryAdapter`].
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Forces every `store` call to fail.
    pub fail_store: bool,
    /// Forces every `retrieve` call to fail.
    pub fail_retrieve: bool,
    /// Forces `ping` to fail (marks the endpoint unhealthy in health checks).
    pub fail_ping: bool,
    /// Artificial latency injected before every call completes.
    pub latency: Duration,
}

#[derive(Debug, Default)]
struct Store {
    blobs: HashMap<String, Vec<u8>>,
    next_id: u64,
}

/// An in-process storage backend keyed by a monotonically assigned path.
#[derive(Debug)]
pub struct InMemoryAdapter {
    label: String,
    store: Mutex<Store>,
    faults: Mutex<FaultConfig>,
}

impl InMemoryAdapter {
    /// Creates an empty adapter identified by `label` (used only in path strings).
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            store: Mutex::new(Store::default()),
            faults: Mutex::new(FaultConfig::default()),
        }
    }

    /// Replaces the fault-injection configuration.
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = faults;
    }

    /// Number of blobs currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner).blobs.len()
    }

    /// Whether this adapter holds no blobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn apply_latency(&self) {
        let latency = self.faults.lock().unwrap_or_else(std::sync::PoisonError::into_inner).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn store(
        &self,
        hash: &str,
        content: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<String, StorageAdapterError> {
        self.apply_latency().await;
        if self.faults.lock().unwrap_or_else(std::sync::PoisonError::into_inner).fail_store {
            return Err(StorageAdapterError::Backend(format!(
                "{}: injected store failure",
                self.label
            )));
        }
        let mut store = self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let path = format!("{}/{}/{}", self.label, store.next_id, hash);
        store.next_id += 1;
        store.blobs.insert(path.clone(), content.to_vec());
        Ok(path)
    }

    async fn retrieve(
        &self,
        path: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, StorageAdapterError> {
        self.apply_latency().await;
        if self.faults.lock().unwrap_or_else(std::sync::PoisonError::into_inner).fail_retrieve {
            return Err(StorageAdapterError::Backend(format!(
                "{}: injected retrieve failure",
                self.label
            )));
        }
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| StorageAdapterError::NotFound { path: path.to_string() })
    }

    async fn delete(&self, path: &str, _cancel: &CancellationToken) -> Result<(), StorageAdapterError> {
        self.apply_latency().await;
        self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner).blobs.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageAdapterError> {
        Ok(self.store.lock().unwrap_or_else(std::sync::PoisonError::into_inner).blobs.contains_key(path))
    }

    async fn get_size(&self, path: &str) -> Result<u64, StorageAdapterError> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .blobs
            .get(path)
            .map(|blob| blob.len() as u64)
            .ok_or_else(|| StorageAdapterError::NotFound { path: path.to_string() })
    }

    async fn get_metadata(&self, path: &str) -> Result<StorageMetadata, StorageAdapterError> {
        Ok(StorageMetadata {
            size: self.get_size(path).await?,
        })
    }

    async fn ping(&self) -> Result<(), StorageAdapterError> {
        if self.faults.lock().unwrap_or_else(std::sync::PoisonError::into_inner).fail_ping {
            return Err(StorageAdapterError::Backend(format!("{}: injected ping failure", self.label)));
        }
        Ok(())
    }
}
