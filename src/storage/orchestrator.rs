//! Storage orchestrator: owns an ordered set of storage adapters tagged
//! primary/backup/mirror, a per-endpoint circuit breaker, and a background
//! health-check loop. Exposes the same surface as a single
//! [`StorageAdapter`] plus mirror/registration semantics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::catalog::{EndpointHealthSample, MetadataCatalog};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::OrchestratorConfig;

use super::adapter::{StorageAdapter, StorageAdapterError, StorageMetadata};

/// Role an endpoint plays in the write/read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Tried first on writes and reads.
    Primary,
    /// Tried in registration order after the primary fails.
    Backup,
    /// Fanned out to asynchronously; never the primary read/write target.
    Mirror,
}

/// Point-in-time health snapshot for one registered endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    /// Endpoint identifier as passed to `register_endpoint`.
    pub id: String,
    /// The endpoint's registered role.
    pub role: EndpointRole,
    /// Current healthy/unhealthy flag.
    pub healthy: bool,
    /// Consecutive failed health probes.
    pub consecutive_failures: u32,
    /// Consecutive successful health probes.
    pub consecutive_successes: u32,
    /// Unix timestamp (seconds) of the last completed health probe, or
    /// `None` if this endpoint has never been probed.
    pub last_health_check: Option<i64>,
}

struct EndpointWrapper {
    id: String,
    role: EndpointRole,
    adapter: Arc<dyn StorageAdapter>,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    last_health_check: AtomicI64,
    breaker: CircuitBreaker,
}

/// Sentinel stored in `last_health_check` before the endpoint's first probe.
const NEVER_CHECKED: i64 = 0;

impl EndpointWrapper {
    fn snapshot(&self) -> EndpointHealth {
        let last_health_check = self.last_health_check.load(Ordering::Relaxed);
        EndpointHealth {
            id: self.id.clone(),
            role: self.role,
            healthy: self.healthy.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.consecutive_successes.load(Ordering::Relaxed),
            last_health_check: (last_health_check != NEVER_CHECKED).then_some(last_health_check),
        }
    }
}

/// Coordinates a set of [`StorageAdapter`] endpoints behind failover and
/// asynchronous mirroring, with per-endpoint circuit breakers and a
/// background health-check loop.
pub struct StorageOrchestrator {
    config: OrchestratorConfig,
    endpoints: RwLock<Vec<Arc<EndpointWrapper>>>,
    catalog: Option<Arc<dyn MetadataCatalog>>,
    shutdown: Arc<Notify>,
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StorageOrchestrator {
    /// Creates an orchestrator with no registered endpoints. `catalog`, if
    /// given, receives fire-and-forget `EndpointHealthSample` writes on
    /// confirmed health transitions.
    #[must_use]
    pub fn new(config: OrchestratorConfig, catalog: Option<Arc<dyn MetadataCatalog>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            endpoints: RwLock::new(Vec::new()),
            catalog,
            shutdown: Arc::new(Notify::new()),
            health_task: std::sync::Mutex::new(None),
        })
    }

    /// Registers a new endpoint, starting healthy with a fresh circuit breaker.
    pub async fn register_endpoint(&self, id: impl Into<String>, adapter: Arc<dyn StorageAdapter>, role: EndpointRole) {
        let wrapper = Arc::new(EndpointWrapper {
            id: id.into(),
            role,
            adapter,
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_health_check: AtomicI64::new(NEVER_CHECKED),
            breaker: CircuitBreaker::new(self.config.circuit_breaker),
        });
        self.endpoints.write().await.push(wrapper);
    }

    /// Snapshot of every registered endpoint's health state.
    pub async fn get_endpoint_health(&self) -> Vec<EndpointHealth> {
        self.endpoints.read().await.iter().map(|endpoint| endpoint.snapshot()).collect()
    }

    async fn endpoints_with_role(&self, role: EndpointRole) -> Vec<Arc<EndpointWrapper>> {
        self.endpoints
            .read()
            .await
            .iter()
            .filter(|endpoint| endpoint.role == role)
            .cloned()
            .collect()
    }

    async fn attempt(&self, endpoint: &Arc<EndpointWrapper>, content: &[u8], hash: &str, cancel: &CancellationToken) -> Option<String> {
        if !endpoint.healthy.load(Ordering::Relaxed) || !endpoint.breaker.can_execute() {
            return None;
        }
        let call = endpoint.adapter.store(hash, content, cancel);
        match tokio::time::timeout(self.config.failover_timeout, call).await {
            Ok(Ok(path)) => {
                endpoint.breaker.record_success();
                Some(path)
            }
            Ok(Err(err)) => {
                warn!(endpoint = %endpoint.id, error = %err, "store attempt failed");
                endpoint.breaker.record_failure();
                None
            }
            Err(_) => {
                warn!(endpoint = %endpoint.id, "store attempt timed out");
                endpoint.breaker.record_failure();
                None
            }
        }
    }

    /// Writes `content` to the healthy primary, failing over to backups in
    /// registration order, then fans out to mirrors per configuration.
    #[instrument(skip(self, content), fields(hash = %hash, size = content.len()))]
    pub async fn store(&self, hash: &str, content: &[u8], cancel: &CancellationToken) -> Result<String, StorageAdapterError> {
        let primaries = self.endpoints_with_role(EndpointRole::Primary).await;
        let mut path = None;
        for endpoint in &primaries {
            if let Some(found) = self.attempt(endpoint, content, hash, cancel).await {
                path = Some(found);
                break;
            }
        }

        if path.is_none() && self.config.enable_failover {
            for endpoint in self.endpoints_with_role(EndpointRole::Backup).await {
                if let Some(found) = self.attempt(&endpoint, content, hash, cancel).await {
                    path = Some(found);
                    break;
                }
            }
        }

        let Some(path) = path else {
            return Err(StorageAdapterError::AllEndpointsFailed);
        };

        if self.config.enable_mirroring {
            self.fan_out_mirrors(hash, content, cancel).await;
        }

        Ok(path)
    }

    async fn fan_out_mirrors(&self, hash: &str, content: &[u8], cancel: &CancellationToken) {
        let mirrors = self.endpoints_with_role(EndpointRole::Mirror).await;
        if mirrors.is_empty() {
            return;
        }
        let hash = hash.to_string();
        let content = content.to_vec();
        let cancel = cancel.clone();
        let timeout = self.config.failover_timeout;
        let require_all = self.config.require_all_mirrors_success;

        let run = async move {
            let mut handles = Vec::with_capacity(mirrors.len());
            for mirror in mirrors {
                let hash = hash.clone();
                let content = content.clone();
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    let result = tokio::time::timeout(timeout, mirror.adapter.store(&hash, &content, &cancel)).await;
                    match result {
                        Ok(Ok(_)) => {
                            mirror.breaker.record_success();
                            true
                        }
                        _ => {
                            mirror.breaker.record_failure();
                            warn!(endpoint = %mirror.id, "mirror store failed");
                            false
                        }
                    }
                }));
            }
            let mut all_ok = true;
            for handle in handles {
                all_ok &= handle.await.unwrap_or(false);
            }
            if require_all && !all_ok {
                warn!("one or more mirrors failed to replicate; primary write is still authoritative");
            }
        };

        if self.config.mirror_async {
            tokio::spawn(run);
        } else {
            run.await;
        }
    }

    /// Reads `path` back, trying the primary first, then backups, then mirrors.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<u8>, StorageAdapterError> {
        let endpoints = self.endpoints.read().await.clone();
        let ordered = endpoints
            .iter()
            .filter(|endpoint| endpoint.role == EndpointRole::Primary)
            .chain(endpoints.iter().filter(|endpoint| endpoint.role == EndpointRole::Backup))
            .chain(endpoints.iter().filter(|endpoint| endpoint.role == EndpointRole::Mirror));

        let mut last_err = StorageAdapterError::AllEndpointsFailed;
        for endpoint in ordered {
            if !endpoint.healthy.load(Ordering::Relaxed) || !endpoint.breaker.can_execute() {
                continue;
            }
            let call = endpoint.adapter.retrieve(path, cancel);
            match tokio::time::timeout(self.config.failover_timeout, call).await {
                Ok(Ok(content)) => {
                    endpoint.breaker.record_success();
                    return Ok(content);
                }
                Ok(Err(err)) => {
                    endpoint.breaker.record_failure();
                    last_err = err;
                }
                Err(_) => {
                    endpoint.breaker.record_failure();
                    last_err = StorageAdapterError::Timeout;
                }
            }
        }
        Err(last_err)
    }

    /// Attempts to delete `path` on every registered endpoint. Best-effort
    /// and idempotent; returns an aggregated error only if at least one
    /// non-`NotFound` failure occurred.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), StorageAdapterError> {
        let endpoints = self.endpoints.read().await.clone();
        let mut failures = Vec::new();
        for endpoint in endpoints {
            if let Err(err) = endpoint.adapter.delete(path, cancel).await {
                failures.push(format!("{}: {err}", endpoint.id));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageAdapterError::Backend(failures.join("; ")))
        }
    }

    /// Liveness probe delegating to the primary endpoint's `ping`, or the
    /// first available endpoint if there is no primary.
    pub async fn ping(&self) -> Result<(), StorageAdapterError> {
        let endpoints = self.endpoints.read().await.clone();
        let endpoint = endpoints
            .iter()
            .find(|endpoint| endpoint.role == EndpointRole::Primary)
            .or_else(|| endpoints.first())
            .ok_or(StorageAdapterError::AllEndpointsFailed)?;
        endpoint.adapter.ping().await
    }

    /// Full metadata for `path`, queried from the first endpoint that has it.
    pub async fn get_metadata(&self, path: &str) -> Result<StorageMetadata, StorageAdapterError> {
        let endpoints = self.endpoints.read().await.clone();
        for endpoint in endpoints {
            if let Ok(metadata) = endpoint.adapter.get_metadata(path).await {
                return Ok(metadata);
            }
        }
        Err(StorageAdapterError::NotFound { path: path.to_string() })
    }

    /// Starts the background health-check loop on `interval`. Idempotent:
    /// calling this while a loop is already running replaces it.
    pub fn start_health_monitor(self: &Arc<Self>, interval: std::time::Duration) {
        let orchestrator = self.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        orchestrator.health_check_once().await;
                    }
                    () = shutdown.notified() => {
                        debug!("storage orchestrator health monitor shutting down");
                        break;
                    }
                }
            }
        });
        *self.health_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Probes every endpoint once, in parallel, applying the I8 transition
    /// rule. Emits a fire-and-forget `RecordHealth` write on any confirmed
    /// transition.
    async fn health_check_once(&self) {
        let endpoints = self.endpoints.read().await.clone();
        let timeout = self.config.health_check_timeout;
        let mut handles = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            handles.push(tokio::spawn(async move {
                let ok = tokio::time::timeout(timeout, endpoint.adapter.ping())
                    .await
                    .is_ok_and(|result| result.is_ok());
                (endpoint, ok)
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(pair) = handle.await {
                results.push(pair);
            }
        }

        let checked_at = unix_now();
        for (endpoint, ok) in results {
            endpoint.last_health_check.store(checked_at, Ordering::Relaxed);
            let transition = if ok {
                endpoint.consecutive_failures.store(0, Ordering::Relaxed);
                let successes = endpoint.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if !endpoint.healthy.load(Ordering::Relaxed) && successes >= self.config.healthy_threshold {
                    endpoint.healthy.store(true, Ordering::Relaxed);
                    Some(("healthy", None))
                } else {
                    None
                }
            } else {
                endpoint.consecutive_successes.store(0, Ordering::Relaxed);
                let failures = endpoint.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if endpoint.healthy.load(Ordering::Relaxed) && failures >= self.config.unhealthy_threshold {
                    endpoint.healthy.store(false, Ordering::Relaxed);
                    Some(("unhealthy", Some("health probe failed".to_string())))
                } else {
                    None
                }
            };

            if let Some((status, error_message)) = transition {
                if let Some(catalog) = self.catalog.clone() {
                    let sample = EndpointHealthSample {
                        endpoint_id: endpoint.id.clone(),
                        check_time: unix_now(),
                        status: status.to_string(),
                        error_message,
                    };
                    tokio::spawn(async move {
                        if let Err(err) = catalog.record_health(&sample).await {
                            warn!(error = %err, "failed to record endpoint health transition");
                        }
                    });
                }
            }
        }
    }

    /// Stops the health-check loop and waits for it to drain. Idempotent.
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        let handle = self.health_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
