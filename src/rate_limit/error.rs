//! Error type for rate limiter rejections.

use thiserror::Error;

/// Which tier rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitTier {
    /// The caller's IP address is on the deny list.
    Denied,
    /// The per-IP bucket was exhausted.
    Ip,
    /// The per-user bucket was exhausted.
    User,
    /// The global bucket was exhausted.
    Global,
    /// The upload sub-limiter was exhausted.
    Upload,
    /// The download sub-limiter was exhausted.
    Download,
}

impl std::fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Denied => "denied",
            Self::Ip => "ip",
            Self::User => "user",
            Self::Global => "global",
            Self::Upload => "upload",
            Self::Download => "download",
        };
        write!(f, "{label}")
    }
}

/// Rate limiter rejection, carrying the tier that failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limited by {tier} tier")]
pub struct RateLimitError {
    /// Which tier rejected the call.
    pub tier: RateLimitTier,
}

impl RateLimitError {
    /// Builds a rejection for the given tier.
    #[must_use]
    pub fn new(tier: RateLimitTier) -> Self {
        Self { tier }
    }
}
