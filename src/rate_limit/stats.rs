//! Rate limiter statistics snapshot.

/// Point-in-time snapshot of limiter activity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimiterStats {
    /// Total `Allow` calls observed (all tiers combined).
    pub total_checks: u64,
    /// Calls rejected by the deny list.
    pub denied: u64,
    /// Calls rejected by the per-IP bucket.
    pub ip_rejected: u64,
    /// Calls rejected by the per-user bucket.
    pub user_rejected: u64,
    /// Calls rejected by the global bucket.
    pub global_rejected: u64,
    /// Calls rejected by the upload sub-limiter.
    pub upload_rejected: u64,
    /// Calls rejected by the download sub-limiter.
    pub download_rejected: u64,
    /// Number of distinct IP buckets currently tracked.
    pub tracked_ip_buckets: usize,
    /// Number of distinct user buckets currently tracked.
    pub tracked_user_buckets: usize,
}
