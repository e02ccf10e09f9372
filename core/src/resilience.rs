//! Circuit breaker and retry policy for calls to flaky external dependencies.
//! The breaker is deliberately process-local: coordinating half-open probes
//! across processes would need a shared clock and a shared store neither the
//! persistent store nor the HTTP client provide today.

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(10_000),
            success_threshold: 2,
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Serializable snapshot of a breaker's state, for persistence to
/// `circuits.json` between CLI invocations. See [`CircuitBreaker::snapshot`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_elapsed_millis: Option<u64>,
    pub snapshot_taken_at_millis: u64,
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Closed → (N consecutive failures) → Open → (reset timeout elapses) →
/// HalfOpen → (M consecutive successes) → Closed, or (any failure) → Open.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.transition_if_due(&mut inner);
        inner.state
    }

    /// Whether a call may be attempted right now. Also performs the
    /// time-based Open → HalfOpen transition as a side effect of checking.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.transition_if_due(&mut inner);
        !matches!(inner.state, BreakerState::Open)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.transition_if_due(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Force the breaker back to `Closed`, used by the heal orchestrator's
    /// `apply` step once an operator-initiated fix has addressed the
    /// underlying cause.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.transition_if_due(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Capture enough state to reconstruct this breaker in a later process:
    /// the spec's data model marks `CircuitState` "process-wide, persisted
    /// optionally", which only matters for a short-lived CLI invocation if
    /// the breaker survives across separate `mc` runs. `opened_at` is a
    /// monotonic [`Instant`] that cannot itself be serialized, so the
    /// snapshot instead records how long ago it opened *as of the
    /// snapshot*, plus the wall-clock time of the snapshot, and
    /// [`Self::restore`] reconstructs an equivalent `Instant` from the
    /// elapsed wall-clock time since.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.transition_if_due(&mut inner);
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_elapsed_millis: inner.opened_at.map(|t| t.elapsed().as_millis() as u64),
            snapshot_taken_at_millis: now_millis(),
        }
    }

    /// Reconstruct a breaker from a prior [`Self::snapshot`], aging
    /// `opened_at` forward by however much wall-clock time has passed since
    /// the snapshot was taken.
    pub fn restore(config: BreakerConfig, snapshot: BreakerSnapshot) -> Self {
        let opened_at = snapshot.opened_elapsed_millis.map(|elapsed_at_snapshot| {
            let age_since_snapshot = now_millis().saturating_sub(snapshot.snapshot_taken_at_millis);
            let total_age = Duration::from_millis(elapsed_at_snapshot + age_since_snapshot);
            Instant::now().checked_sub(total_age).unwrap_or_else(Instant::now)
        });
        Self {
            config,
            inner: Mutex::new(Inner {
                state: snapshot.state,
                consecutive_failures: snapshot.consecutive_failures,
                consecutive_successes: snapshot.consecutive_successes,
                opened_at,
            }),
        }
    }

    fn transition_if_due(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first: `maxRetries + 1`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// `min(maxDelay, baseDelay * 2^attempt) * jitter`, `jitter ~ uniform[0.7, 1.3]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(20);
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = scaled.min(self.max_delay);
        let jitter = rand::rng().random_range(0.7..=1.3);
        Duration::from_secs_f64(capped.as_secs_f64() * jitter)
    }
}

/// Compose a circuit breaker with a retry policy around a fallible,
/// potentially-async operation. `is_retryable` decides whether a given error
/// should be retried (vs. returned immediately, e.g. for non-idempotent
/// operations or non-transient errors).
pub async fn with_retry<T, E, Fut, F, R>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryOutcome<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        if !breaker.allow_request() {
            return Err(RetryOutcome::CircuitOpen);
        }
        match operation().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(error) => {
                breaker.record_failure();
                attempt += 1;
                if attempt >= policy.max_attempts || !is_retryable(&error) {
                    return Err(RetryOutcome::Exhausted(error));
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome<E> {
    CircuitOpen,
    Exhausted(E),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    #[test]
    fn breaker_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        for _ in 0..2 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn breaker_rejects_requests_while_open() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        breaker.record_failure();
        assert!(!breaker.allow_request());
    }

    #[test]
    fn breaker_half_opens_after_timeout_and_closes_on_successes() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(1),
            success_threshold: 2,
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn breaker_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(1),
            success_threshold: 2,
        });
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn retry_delay_stays_within_jitter_band_of_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        for attempt in 1..10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= Duration::from_millis(650), "delay {delay:?} exceeds 1.3x the cap");
        }
    }

    #[tokio::test]
    async fn with_retry_retries_then_succeeds() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryOutcome<&str>> = with_retry(
            &breaker,
            &policy,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_stops_when_circuit_opens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result: Result<u32, RetryOutcome<&str>> =
            with_retry(&breaker, &policy, || async { Err("boom") }, |_| true).await;
        assert!(matches!(result, Err(RetryOutcome::Exhausted("boom")) | Err(RetryOutcome::CircuitOpen)));
    }

    #[test]
    fn snapshot_round_trips_closed_state() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        breaker.record_failure();
        let snapshot = breaker.snapshot();
        let restored = CircuitBreaker::restore(BreakerConfig::default(), snapshot);
        assert_eq!(restored.state(), BreakerState::Closed);
    }

    #[test]
    fn snapshot_round_trips_open_state_and_preserves_elapsed_time() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, BreakerState::Open);

        let restored = CircuitBreaker::restore(
            BreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_millis(50), ..Default::default() },
            snapshot,
        );
        // The restored breaker should still be open immediately (the
        // reset_timeout has not elapsed since the original failure).
        assert_eq!(restored.state(), BreakerState::Open);
    }
}
