//! Configuration structs for every core component.
//!
//! Each struct mirrors the defaults enumerated in the design spec and is
//! plain `serde`-deserializable data: loading it from a file, environment,
//! or CLI flags is a handler-layer concern and lives outside this crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::cache::Cache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries before eviction kicks in.
    pub max_size: usize,
    /// Maximum approximate memory (bytes) before eviction kicks in.
    pub max_memory: usize,
    /// TTL applied when `Set` is called with `ttl = 0`.
    pub default_ttl: Duration,
    /// Interval between background reaper sweeps.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_memory: 256 * 1024 * 1024,
            default_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for [`crate::rate_limit::RateLimiter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Per-IP token refill rate (tokens/second).
    pub ip_rps: f64,
    /// Per-IP bucket capacity.
    pub ip_burst: f64,
    /// Per-user token refill rate (tokens/second).
    pub user_rps: f64,
    /// Per-user bucket capacity.
    pub user_burst: f64,
    /// Global token refill rate (tokens/second).
    pub global_rps: f64,
    /// Global bucket capacity.
    pub global_burst: f64,
    /// Upload sub-limiter refill rate, expressed per minute.
    pub upload_per_minute: f64,
    /// Upload sub-limiter bucket capacity.
    pub upload_burst: f64,
    /// Download sub-limiter refill rate, expressed per minute.
    pub download_per_minute: f64,
    /// Download sub-limiter bucket capacity.
    pub download_burst: f64,
    /// Addresses that always pass, bypassing every tier.
    pub allow_list: Vec<String>,
    /// Addresses that are always rejected.
    pub deny_list: Vec<String>,
    /// Idle duration after which an unused bucket is reaped.
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            ip_rps: 10.0,
            ip_burst: 20.0,
            user_rps: 20.0,
            user_burst: 40.0,
            global_rps: 500.0,
            global_burst: 1_000.0,
            upload_per_minute: 30.0,
            upload_burst: 10.0,
            download_per_minute: 120.0,
            download_burst: 30.0,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Configuration for [`crate::scanner::SecurityScanner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// MIME types allowed through gate 4. Empty means "allow any".
    pub allowed_mime_types: Vec<String>,
    /// Extensions allowed through gate 2 (including the leading dot). Empty means "allow any".
    pub allowed_extensions: Vec<String>,
    /// Maximum upload size in bytes.
    pub max_file_size: u64,
    /// Maximum image width in pixels.
    pub max_image_width: u32,
    /// Maximum image height in pixels.
    pub max_image_height: u32,
    /// Maximum total pixel count (decompression-bomb guard).
    pub max_image_pixels: u64,
    /// Enable the image decompression-bomb guard (gate 6).
    pub enable_image_bomb_protection: bool,
    /// Enable the external AV hook (gate 8).
    pub enable_av: bool,
    /// Hard deadline for the AV subprocess call.
    pub av_timeout: Duration,
    /// Enable magic-byte signature comparison (gate 5).
    pub enable_magic_bytes: bool,
    /// Treat a magic-byte mismatch as a hard error instead of a warning.
    pub strict_magic_bytes: bool,
    /// Enable the content heuristics scan (gate 7).
    pub enable_content_analysis: bool,
    /// Maximum number of bytes scanned by the content heuristics gate.
    pub max_scan_bytes: usize,
    /// Path to the external AV scanner executable, when `enable_av` is set.
    pub av_command: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: Vec::new(),
            allowed_extensions: Vec::new(),
            max_file_size: 100 * 1024 * 1024,
            max_image_width: 10_000,
            max_image_height: 10_000,
            max_image_pixels: 40_000_000,
            enable_image_bomb_protection: true,
            enable_av: false,
            av_timeout: Duration::from_secs(30),
            enable_magic_bytes: true,
            strict_magic_bytes: false,
            enable_content_analysis: true,
            max_scan_bytes: 1024 * 1024,
            av_command: None,
        }
    }
}

/// Configuration for [`crate::circuit_breaker::CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip from closed to open.
    pub threshold: u32,
    /// Duration the breaker stays open before admitting a half-open probe.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for [`crate::storage::StorageOrchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Enable failover from primary to backups on write.
    pub enable_failover: bool,
    /// Per-call deadline for an individual endpoint write/read attempt.
    pub failover_timeout: Duration,
    /// Maximum retries for transient catalog/adapter errors.
    pub max_retries: u32,
    /// Enable fan-out writes to registered mirror endpoints.
    pub enable_mirroring: bool,
    /// Run mirror fan-out on a detached task instead of blocking the caller.
    pub mirror_async: bool,
    /// Require every mirror to succeed for the overall write to be considered fully replicated.
    ///
    /// Per §4.6, even when this is `true` a mirror failure is only logged: the
    /// top-level `Store` still returns success on primary/backup success.
    pub require_all_mirrors_success: bool,
    /// Interval between health-check sweeps.
    pub health_check_interval: Duration,
    /// Per-probe timeout during a health-check sweep.
    pub health_check_timeout: Duration,
    /// Consecutive failed probes required to mark a healthy endpoint unhealthy.
    pub unhealthy_threshold: u32,
    /// Consecutive successful probes required to mark an unhealthy endpoint healthy.
    pub healthy_threshold: u32,
    /// Circuit breaker configuration shared by every registered endpoint.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_failover: true,
            failover_timeout: Duration::from_secs(10),
            max_retries: 3,
            enable_mirroring: false,
            mirror_async: true,
            require_all_mirrors_success: false,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}
