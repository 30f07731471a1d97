//! Circuit Breaker
//!
//! Per-backend failure detector. A breaker trips open after a run of
//! consecutive failures, rejects calls until the recovery timeout elapses,
//! then admits a single probe whose outcome decides whether it closes again.

use crate::error::{RouterError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Default consecutive failures before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open breaker waits before admitting a probe
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls permitted
    Closed,

    /// Calls rejected pre-emptively
    Open,

    /// A single probe call permitted
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub since_last_failure: Option<Duration>,
}

/// Circuit breaker guarding one backend
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Backend this breaker belongs to
    backend_id: String,

    failure_threshold: u32,
    recovery_timeout: Duration,

    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(backend_id: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Get the backend id
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Get the configured failure threshold
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Get the configured recovery timeout
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Whether a call may be made right now.
    ///
    /// The only side effect is the lazy Open -> HalfOpen transition once the
    /// recovery timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Claim permission for one dispatch.
    ///
    /// In HalfOpen this takes the single probe slot, so a second concurrent
    /// caller is turned away with [`RouterError::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Ok(())
            }
            _ => Err(RouterError::CircuitOpen(self.backend_id.clone())),
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_in_flight = false;
                info!(backend = %self.backend_id, "circuit closed after successful probe");
            }
            // late completion of an abandoned call; stay open
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                info!(
                    backend = %self.backend_id,
                    failures = inner.consecutive_failures,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                info!(backend = %self.backend_id, "probe failed, circuit re-opened");
            }
            _ => {}
        }
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        info!(backend = %self.backend_id, "circuit manually reset");
    }

    /// Current stored state, without applying the lazy recovery transition
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// State as the next caller would see it.
    ///
    /// An Open breaker whose recovery timeout has elapsed reads as HalfOpen.
    /// Unlike `can_execute` this does not store the transition.
    pub fn effective_state(&self) -> CircuitState {
        let inner = self.inner.lock();
        self.observed_state(&inner)
    }

    /// Get a snapshot of the breaker
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: self.observed_state(&inner),
            consecutive_failures: inner.consecutive_failures,
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    fn recovered(&self, inner: &BreakerInner) -> bool {
        inner.state == CircuitState::Open
            && inner
                .last_failure
                .map_or(true, |at| at.elapsed() > self.recovery_timeout)
    }

    fn observed_state(&self, inner: &BreakerInner) -> CircuitState {
        if self.recovered(inner) {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if self.recovered(inner) {
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
            info!(backend = %self.backend_id, "circuit half-open, admitting probe");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::from_secs(60))
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(matches!(cb.try_acquire(), Err(RouterError::CircuitOpen(_))));
    }

    #[test]
    fn test_success_resets_counter() {
        let cb = breaker();

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_timeout() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.can_execute());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_effective_state_reports_recovery_without_transition() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.effective_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cb.effective_state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().state, CircuitState::HalfOpen);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        cb.try_acquire().unwrap();
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        cb.try_acquire().unwrap();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // recovery timer restarted by the failed probe
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(cb.try_acquire().is_ok());
        assert!(!cb.can_execute());
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn test_manual_reset() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert!(cb.snapshot().since_last_failure.is_none());
    }

    #[test]
    fn test_success_while_open_keeps_open() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
