//! Cache value representation and live-entry bookkeeping.

use std::time::Instant;

/// Opaque value stored in the cache.
///
/// The source this crate is modeled on returns cached values via reflective
/// type assertion (`value.(T)`); Rust has no such mechanism. Instead of a
/// `nil`-on-miss sentinel hiding inside the value slot, callers get a sealed
/// tagged container and recover their concrete type explicitly. Callers that
/// want a single static type end-to-end should wrap [`super::Cache`] in a
/// small typed façade that always constructs/matches the same variant.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Raw bytes, e.g. a serialized blob or file content.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Structured JSON, e.g. a cached catalog row.
    Json(serde_json::Value),
}

impl CacheValue {
    /// Approximate heap size in bytes, used for the `max_memory` eviction bound.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Text(s) => s.len(),
            Self::Json(v) => v.to_string().len(),
        }
    }

    /// Returns the bytes variant, if this value holds one.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Text(_) | Self::Json(_) => None,
        }
    }

    /// Returns the text variant, if this value holds one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bytes(_) | Self::Json(_) => None,
        }
    }

    /// Returns the JSON variant, if this value holds one.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Bytes(_) | Self::Text(_) => None,
        }
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// A single live cache entry.
#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub(super) value: CacheValue,
    pub(super) expiration_time: Instant,
    pub(super) size: usize,
}

impl CacheEntry {
    pub(super) fn new(value: CacheValue, ttl: std::time::Duration) -> Self {
        let size = value.approx_size();
        Self {
            value,
            expiration_time: Instant::now() + ttl,
            size,
        }
    }

    pub(super) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiration_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_value_approx_size_bytes() {
        let value = CacheValue::Bytes(vec![0u8; 42]);
        assert_eq!(value.approx_size(), 42);
    }

    #[test]
    fn test_cache_value_accessors_only_match_own_variant() {
        let value = CacheValue::Text("hi".to_string());
        assert_eq!(value.as_text(), Some("hi"));
        assert_eq!(value.as_bytes(), None);
        assert_eq!(value.as_json(), None);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let entry = CacheEntry::new(CacheValue::Bytes(vec![1]), std::time::Duration::ZERO);
        // ttl of zero should already be expired "now" or immediately after.
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(entry.is_expired(Instant::now()));
    }
}
