use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use strum::Display;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerSettings;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-endpoint circuit breaker.
///
/// Closed -> Open after `failure_threshold` consecutive failures; Open ->
/// HalfOpen once the cooldown elapses, admitting exactly one probe; the
/// probe's outcome closes or reopens the circuit. Any success in Closed
/// resets the failure counter.
///
/// State lives in atomics: breakers are process-wide singletons hit from
/// every worker at once, and `admit` sits on the hot path of each request.
pub struct CircuitBreaker {
    endpoint: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(endpoint: &'static str, settings: BreakerSettings) -> Self {
        Self {
            endpoint,
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown,
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Whether a call may go out right now.
    ///
    /// While open, the first caller past the cooldown wins the transition to
    /// half-open and becomes the probe; everyone else keeps getting refused
    /// until the probe reports back.
    pub fn admit(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            CLOSED => true,
            HALF_OPEN => false,
            _ => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                let elapsed = self.epoch.elapsed().as_millis() as u64 - opened_at;
                if elapsed < self.cooldown.as_millis() as u64 {
                    return false;
                }
                self.state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
        }
    }

    pub fn record_success(&self) {
        let previous = self.state.swap(CLOSED, Ordering::AcqRel);
        self.consecutive_failures.store(0, Ordering::Release);
        if previous != CLOSED {
            info!(endpoint = self.endpoint, "circuit closed");
        }
    }

    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => self.trip("probe failed"),
            CLOSED => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    self.trip("failure threshold reached");
                }
            }
            _ => {}
        }
    }

    fn trip(&self, reason: &'static str) {
        self.opened_at_millis
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Release);
        self.state.store(OPEN, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        warn!(
            endpoint = self.endpoint,
            cooldown = ?self.cooldown,
            reason,
            "circuit opened"
        );
    }
}
