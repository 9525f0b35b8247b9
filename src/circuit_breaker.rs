//! Three-state per-endpoint circuit breaker.
//!
//! Skips a failing endpoint without paying its timeout cost on every call.
//! State transitions follow §4.5/I7 exactly: `closed --(threshold
//! failures)--> open --(timeout elapsed)--> half_open --(success)--> closed`,
//! `half_open --(failure)--> open`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::config::CircuitBreakerConfig;

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls are permitted; failures are counted toward `threshold`.
    Closed,
    /// Calls are denied until `timeout` has elapsed since opening.
    Open,
    /// A single probe call is in flight, deciding the next state.
    HalfOpen,
}

/// Snapshot of breaker counters, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures observed in the closed state.
    pub failures: u32,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe per-endpoint circuit breaker.
///
/// All state is mutated only under the breaker's own lock, never under any
/// orchestrator-wide lock (§5's shared-resource policy).
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a breaker starting in the `closed` state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.threshold,
            timeout: config.timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Returns whether a call may proceed right now.
    ///
    /// When the breaker is `open` and `timeout` has elapsed, this call
    /// itself performs the `open -> half_open` transition and admits
    /// exactly one caller (subsequent concurrent callers observing
    /// `half_open` are denied until that probe resolves).
    #[instrument(skip(self))]
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.timeout {
                    debug!("breaker timeout elapsed, admitting half-open probe");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call.
    #[instrument(skip(self))]
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.failures = 0;
        if inner.state != BreakerState::Closed {
            debug!(from = ?inner.state, "breaker closing after success");
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    /// Records a failed call.
    #[instrument(skip(self))]
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.state {
            BreakerState::HalfOpen => {
                debug!("half-open probe failed, reopening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.threshold {
                    debug!(failures = inner.failures, "threshold reached, opening breaker");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {
                // Already open; nothing to do.
            }
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn get_state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).state
    }

    /// Resets the breaker to `closed` with zero failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    /// Returns a snapshot of breaker counters.
    #[must_use]
    pub fn get_stats(&self) -> BreakerStats {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        BreakerStats {
            state: inner.state,
            failures: inner.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig { threshold, timeout })
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(3, Duration::from_millis(50));
        assert_eq!(cb.get_state(), BreakerState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.get_state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.get_state(), BreakerState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_failure_count_in_closed_state() {
        let cb = breaker(3, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Two failures since the reset; still below threshold of 3.
        assert_eq!(cb.get_state(), BreakerState::Closed);
    }

    #[test]
    fn test_admits_one_probe_after_timeout_then_closes_on_success() {
        let cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        assert_eq!(cb.get_state(), BreakerState::Open);
        assert!(!cb.can_execute());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        assert_eq!(cb.get_state(), BreakerState::HalfOpen);

        // A second concurrent caller sees half-open and is denied.
        assert!(!cb.can_execute());

        cb.record_success();
        assert_eq!(cb.get_state(), BreakerState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.get_state(), BreakerState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_reset_clears_state() {
        let cb = breaker(1, Duration::from_secs(30));
        cb.record_failure();
        assert_eq!(cb.get_state(), BreakerState::Open);
        cb.reset();
        assert_eq!(cb.get_state(), BreakerState::Closed);
        assert_eq!(cb.get_stats().failures, 0);
    }
}
