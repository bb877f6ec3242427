//! Failure-tracking guard for the external workflow service.
//!
//! The breaker has two states:
//!
//! ```text
//! closed -> open    (consecutive failure count reaches the threshold)
//! open   -> closed  (cool-down elapsed since the last failure, or a success)
//! ```
//!
//! While open, [`CircuitBreaker::check`] fails without any network call. The
//! breaker is an injectable component shared by reference, not a process
//! global, and its state sits behind a mutex so concurrent submissions cannot
//! race the failure counter.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive terminal failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open after the last recorded failure.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Error returned while the breaker is open. User-facing: the detail view
/// shows this message verbatim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("itinerary generation is temporarily unavailable, try again in {}s", .retry_after.as_secs().max(1))]
pub struct BreakerOpen {
    /// Remaining cool-down at the time of the check.
    pub retry_after: Duration,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// The circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // The state is plain data; a poisoned lock still holds a usable value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether a new generation attempt is allowed.
    ///
    /// When the cool-down window has elapsed since the last failure, the
    /// breaker re-closes (the counter resets to zero) even without an
    /// intervening success.
    pub fn check(&self) -> Result<(), BreakerOpen> {
        let mut state = self.lock();

        if state.consecutive_failures < self.config.failure_threshold {
            return Ok(());
        }

        match state.last_failure {
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed >= self.config.cooldown {
                    tracing::info!("circuit breaker cool-down elapsed, closing");
                    *state = BreakerState::default();
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        retry_after: self.config.cooldown - elapsed,
                    })
                }
            }
            // Failures without a timestamp cannot age out; treat as open for
            // the full window.
            None => Err(BreakerOpen {
                retry_after: self.config.cooldown,
            }),
        }
    }

    /// Whether the breaker currently blocks new attempts.
    pub fn is_open(&self) -> bool {
        self.check().is_err()
    }

    /// Record one terminal generation failure.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());

        if state.consecutive_failures == self.config.failure_threshold {
            tracing::warn!(
                failures = state.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    /// Record a successful generation: resets the breaker to closed.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.consecutive_failures > 0 {
            tracing::info!(
                failures = state.consecutive_failures,
                "circuit breaker reset after success"
            );
        }
        *state = BreakerState::default();
    }

    /// Current consecutive-failure count (for status displays).
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
