// =============================================================================
// Per-Provider Circuit Breaker
// =============================================================================
//
// Tracks consecutive failures for one provider and short-circuits calls once
// `max_failures` is reached. Mirrors the teacher's rate-limit tracker in
// spirit (atomic counters queried lock-free by any thread) but adds the
// closed/open/half-open state machine the multiplex needs.
// =============================================================================

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thread-safe circuit breaker backed by atomics, one per provider.
pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout_ms: u64,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    /// Set while a half-open trial call is in flight, so concurrent callers
    /// don't all rush the provider the instant the reset timeout elapses.
    trial_in_flight: AtomicU32,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, reset_timeout_ms: u64) -> Self {
        Self {
            max_failures,
            reset_timeout_ms,
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            trial_in_flight: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        let failures = self.consecutive_failures.load(Ordering::Acquire);
        if failures < self.max_failures {
            return BreakerState::Closed;
        }
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        if now_ms().saturating_sub(opened_at) >= self.reset_timeout_ms {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }

    /// Whether a call is currently allowed through. Open -> false. Half-open
    /// allows exactly one trial caller through (compare-and-swap on
    /// `trial_in_flight`); subsequent concurrent callers are still denied
    /// until the trial resolves.
    pub fn allow_call(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    pub fn record_success(&self) {
        let prev = self.consecutive_failures.swap(0, Ordering::AcqRel);
        self.trial_in_flight.store(0, Ordering::Release);
        if prev >= self.max_failures {
            debug!("circuit breaker reset to closed after successful trial call");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.trial_in_flight.store(0, Ordering::Release);
        if failures == self.max_failures {
            self.opened_at_ms.store(now_ms(), Ordering::Release);
            warn!(failures, "circuit breaker opened after consecutive failures");
        } else if failures > self.max_failures {
            // Failure during the half-open trial call: stay open, restart timer.
            self.opened_at_ms.store(now_ms(), Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_until_max_failures() {
        let cb = CircuitBreaker::new(3, 60_000);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_reset_timeout() {
        let cb = CircuitBreaker::new(1, 0);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.allow_call());
        // A second concurrent caller is denied while the trial is in flight.
        assert!(!cb.allow_call());
    }

    #[test]
    fn half_open_trial_failure_reopens() {
        let cb = CircuitBreaker::new(1, 0);
        cb.record_failure();
        assert!(cb.allow_call());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }
}
