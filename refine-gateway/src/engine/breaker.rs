use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::EngineError;

/// Circuit breaker states. `HalfOpen` allows a bounded number of probe
/// calls before deciding whether to close or re-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    /// When the breaker tripped to `Open` (used to time the half-open probe).
    opened_at: Option<Instant>,
    /// Probe calls granted since entering `HalfOpen`.
    half_open_trials_used: u32,
    /// Start of the current consecutive-failure counting window.
    window_start: Instant,
}

/// Process-wide circuit breaker guarding calls to the refinement engine.
///
/// This is the only shared mutable in-memory state relevant to the
/// gateway's correctness; all access goes through its own `Mutex`.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    open_dwell: Duration,
    half_open_trials: u32,
    failure_window: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_dwell: Duration, half_open_trials: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_trials_used: 0,
                window_start: Instant::now(),
            }),
            failure_threshold,
            open_dwell,
            half_open_trials,
            failure_window: Duration::from_secs(60),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Decide whether a call is admitted right now. Transitions `Open` →
    /// `HalfOpen` once the dwell period has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_dwell {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_trials_used = 0;
                    info!("circuit breaker entering half-open state");
                    inner.half_open_trials_used += 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_trials_used < self.half_open_trials {
                    inner.half_open_trials_used += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            info!("circuit breaker closing after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.window_start = Instant::now();
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("circuit breaker re-opening after failed half-open probe");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
            }
            CircuitState::Closed | CircuitState::Open => {
                if inner.window_start.elapsed() > self.failure_window {
                    inner.consecutive_failures = 0;
                    inner.window_start = Instant::now();
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures > self.failure_threshold
                    && inner.state == CircuitState::Closed
                {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker tripping open"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Run `f` under the breaker. Fails fast with [`EngineError::Tripped`]
    /// without calling `f` at all when the breaker is open.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        if !self.admit() {
            return Err(EngineError::Tripped);
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok() -> Result<(), EngineError> {
        Ok(())
    }

    async fn fail() -> Result<(), EngineError> {
        Err(EngineError::Unreachable("boom".into()))
    }

    #[tokio::test]
    async fn trips_open_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(30), 3);
        for _ in 0..5 {
            assert!(breaker.call(fail).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(300), 3);
        assert!(breaker.call(fail).await.is_err());
        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.call(ok).await;
        assert!(matches!(result, Err(EngineError::Tripped)));
    }

    #[tokio::test]
    async fn half_open_success_closes_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10), 3);
        assert!(breaker.call(fail).await.is_err());
        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(breaker.call(ok).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10), 3);
        assert!(breaker.call(fail).await.is_err());
        assert!(breaker.call(fail).await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(breaker.call(fail).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
