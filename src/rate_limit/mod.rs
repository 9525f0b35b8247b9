//! Token-bucket rate limiter with per-IP, per-user, and global tiers,
//! allow/deny lists, and separate upload/download sub-limiters.
//!
//! Directly generalizes the per-domain `DashMap<String, Arc<DomainState>>`
//! pattern this crate's HTTP client used for delay-gating (one lazily
//! created state per key, looked up without holding the map's lock across
//! any blocking work) from "one delay gate per domain" to "one token
//! bucket per IP/user/global key".
//!
//! # Example
//!
//! ```
//! use attachments_core::rate_limit::RateLimiter;
//! use attachments_core::config::RateLimiterConfig;
//!
//! let limiter = RateLimiter::new(RateLimiterConfig {
//!     ip_burst: 2.0,
//!     ip_rps: 1.0,
//!     ..RateLimiterConfig::default()
//! });
//! assert!(limiter.allow("10.0.0.1", None).is_ok());
//! assert!(limiter.allow("10.0.0.1", None).is_ok());
//! assert!(limiter.allow("10.0.0.1", None).is_err());
//! ```

mod error;
mod stats;
mod token_bucket;

pub use error::{RateLimitError, RateLimitTier};
pub use stats::LimiterStats;
pub use token_bucket::TokenBucket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::config::RateLimiterConfig;

/// Result alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

#[derive(Default)]
struct Counters {
    total_checks: AtomicU64,
    denied: AtomicU64,
    ip_rejected: AtomicU64,
    user_rejected: AtomicU64,
    global_rejected: AtomicU64,
    upload_rejected: AtomicU64,
    download_rejected: AtomicU64,
}

/// Composite rate limiter: per-IP, per-user, and global token buckets,
/// plus independent upload/download sub-limiters and allow/deny lists.
pub struct RateLimiter {
    config: RateLimiterConfig,
    global: TokenBucket,
    per_ip: DashMap<String, Arc<TokenBucket>>,
    per_user: DashMap<String, Arc<TokenBucket>>,
    upload_by_ip: DashMap<String, Arc<TokenBucket>>,
    download_by_ip: DashMap<String, Arc<TokenBucket>>,
    allow_list: DashSet<String>,
    deny_list: DashSet<String>,
    counters: Counters,
    shutdown: Arc<Notify>,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Creates a limiter and starts its idle-bucket reaper.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Arc<Self> {
        let allow_list = DashSet::new();
        let deny_list = DashSet::new();
        for ip in &config.allow_list {
            allow_list.insert(ip.clone());
        }
        for ip in &config.deny_list {
            deny_list.insert(ip.clone());
        }

        let global = TokenBucket::new(config.global_burst, config.global_rps);

        let limiter = Arc::new(Self {
            global,
            per_ip: DashMap::new(),
            per_user: DashMap::new(),
            upload_by_ip: DashMap::new(),
            download_by_ip: DashMap::new(),
            allow_list,
            deny_list,
            counters: Counters::default(),
            shutdown: Arc::new(Notify::new()),
            cleanup_task: std::sync::Mutex::new(None),
            config,
        });
        limiter.clone().spawn_cleanup();
        limiter
    }

    fn spawn_cleanup(self: Arc<Self>) {
        let interval = self.config.cleanup_interval;
        let shutdown = self.shutdown.clone();
        let limiter = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        limiter.reap_idle_buckets();
                    }
                    () = shutdown.notified() => {
                        debug!("rate limiter cleanup task shutting down");
                        break;
                    }
                }
            }
        });
        *self.cleanup_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    fn reap_idle_buckets(&self) {
        let idle = self.config.cleanup_interval;
        self.per_ip.retain(|_, bucket| bucket.idle_for() < idle);
        self.per_user.retain(|_, bucket| bucket.idle_for() < idle);
        self.upload_by_ip.retain(|_, bucket| bucket.idle_for() < idle);
        self.download_by_ip.retain(|_, bucket| bucket.idle_for() < idle);
    }

    fn ip_bucket(&self, ip: &str) -> Arc<TokenBucket> {
        self.per_ip
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.config.ip_burst, self.config.ip_rps)))
            .clone()
    }

    fn user_bucket(&self, user: &str) -> Arc<TokenBucket> {
        self.per_user
            .entry(user.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(self.config.user_burst, self.config.user_rps))
            })
            .clone()
    }

    /// General admission check: deny-list short-circuits to reject,
    /// allow-list short-circuits to accept, otherwise the global, IP, and
    /// (if present) user buckets must each admit the call.
    #[instrument(skip(self))]
    pub fn allow(&self, ip: &str, user: Option<&str>) -> Result<()> {
        self.counters.total_checks.fetch_add(1, Ordering::Relaxed);

        if self.deny_list.contains(ip) {
            self.counters.denied.fetch_add(1, Ordering::Relaxed);
            return Err(RateLimitError::new(RateLimitTier::Denied));
        }
        if self.allow_list.contains(ip) {
            return Ok(());
        }

        if !self.global.allow() {
            self.counters.global_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RateLimitError::new(RateLimitTier::Global));
        }

        if !self.ip_bucket(ip).allow() {
            self.counters.ip_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RateLimitError::new(RateLimitTier::Ip));
        }

        if let Some(user) = user {
            if !self.user_bucket(user).allow() {
                self.counters.user_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RateLimitError::new(RateLimitTier::User));
            }
        }

        Ok(())
    }

    /// Admission check for upload operations: the general tiers, plus the
    /// upload sub-limiter keyed by IP.
    #[instrument(skip(self))]
    pub fn allow_upload(&self, ip: &str, user: Option<&str>) -> Result<()> {
        self.allow(ip, user)?;
        let bucket = self
            .upload_by_ip
            .entry(ip.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(
                    self.config.upload_burst,
                    self.config.upload_per_minute / 60.0,
                ))
            })
            .clone();
        if bucket.allow() {
            Ok(())
        } else {
            self.counters.upload_rejected.fetch_add(1, Ordering::Relaxed);
            Err(RateLimitError::new(RateLimitTier::Upload))
        }
    }

    /// Admission check for download operations: the general tiers, plus the
    /// download sub-limiter keyed by IP.
    #[instrument(skip(self))]
    pub fn allow_download(&self, ip: &str, user: Option<&str>) -> Result<()> {
        self.allow(ip, user)?;
        let bucket = self
            .download_by_ip
            .entry(ip.to_string())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(
                    self.config.download_burst,
                    self.config.download_per_minute / 60.0,
                ))
            })
            .clone();
        if bucket.allow() {
            Ok(())
        } else {
            self.counters.download_rejected.fetch_add(1, Ordering::Relaxed);
            Err(RateLimitError::new(RateLimitTier::Download))
        }
    }

    /// Adds `ip` to the deny list, short-circuiting future calls to `Err(Denied)`.
    pub fn add_to_blacklist(&self, ip: &str) {
        self.deny_list.insert(ip.to_string());
    }

    /// Removes `ip` from the deny list.
    pub fn remove_from_blacklist(&self, ip: &str) {
        self.deny_list.remove(ip);
    }

    /// Returns a snapshot of limiter activity.
    #[must_use]
    pub fn get_stats(&self) -> LimiterStats {
        LimiterStats {
            total_checks: self.counters.total_checks.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            ip_rejected: self.counters.ip_rejected.load(Ordering::Relaxed),
            user_rejected: self.counters.user_rejected.load(Ordering::Relaxed),
            global_rejected: self.counters.global_rejected.load(Ordering::Relaxed),
            upload_rejected: self.counters.upload_rejected.load(Ordering::Relaxed),
            download_rejected: self.counters.download_rejected.load(Ordering::Relaxed),
            tracked_ip_buckets: self.per_ip.len(),
            tracked_user_buckets: self.per_user.len(),
        }
    }

    /// Stops the cleanup task and waits for it to drain. Idempotent.
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        let handle = self
            .cleanup_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
