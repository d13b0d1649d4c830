//! Retry with exponential backoff and a per-operation-class circuit breaker.
//!
//! [`RetryExecutor::execute`] wraps a fallible async operation. Transient
//! failures are retried with capped exponential backoff plus uniform jitter;
//! fatal failures abort immediately and never count toward the breaker.
//! After enough consecutive transient failures the breaker opens and callers
//! fail fast with [`RetryError::CircuitOpen`] until the cool-down passes, at
//! which point a single probe call decides whether the breaker closes again.

use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::error::FetchFailure;

/// Backoff schedule for one operation class.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Uniform jitter applied as a `1.0 ± fraction` factor on each delay.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter_fraction: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter delay after the k-th failed attempt (1-based):
    /// `min(base * multiplier^(k-1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Apply the jitter factor. Keeps retry storms from synchronizing.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range(-self.jitter_fraction..=self.jitter_fraction);
        let ms = (delay.as_millis() as f64 * (1.0 + factor)).max(0.0);
        Duration::from_millis(ms as u64)
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Consecutive-failure breaker for one operation class.
///
/// Owned by a single session; there are no process-wide breakers.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a call may proceed right now. An open breaker whose cool-down
    /// has elapsed moves to half-open and lets exactly one probe through
    /// (calls are serial within a session).
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            // A failed probe reopens the breaker and restarts the cool-down.
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            BreakerState::Closed if self.consecutive_failures >= self.threshold => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure(String),
    FatalFailure(String),
}

/// One call through the executor. In-memory only, never persisted.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub operation: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// Terminal result of an exhausted or short-circuited execute call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("fatal failure: {0}")]
    Fatal(String),

    #[error("operation cancelled")]
    Cancelled,
}

const ATTEMPT_HISTORY_LIMIT: usize = 32;

/// Retry driver for one operation class. Holds that class's breaker and a
/// bounded history of recent attempts.
pub struct RetryExecutor {
    operation: String,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    history: Vec<AttemptRecord>,
}

impl RetryExecutor {
    pub fn new(operation: impl Into<String>, policy: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self {
            operation: operation.into(),
            policy,
            breaker,
            history: Vec::new(),
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// Run `op` to completion under the retry policy.
    ///
    /// The backoff sleep races the cancellation flag so a stop request is
    /// honored mid-wait.
    pub async fn execute<T, F, Fut>(&mut self, cancel: &CancelFlag, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchFailure>>,
    {
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            if !self.breaker.try_acquire() {
                debug!(operation = %self.operation, "circuit open, failing fast");
                return Err(RetryError::CircuitOpen);
            }

            let started = Instant::now();
            match op().await {
                Ok(value) => {
                    self.breaker.record_success();
                    self.record(attempt, AttemptOutcome::Success, started.elapsed());
                    return Ok(value);
                }
                Err(FetchFailure::Fatal(msg)) => {
                    // Fatal errors are not transient: no retry, no breaker count.
                    self.record(attempt, AttemptOutcome::FatalFailure(msg.clone()), started.elapsed());
                    warn!(operation = %self.operation, attempt, error = %msg, "fatal failure, aborting");
                    return Err(RetryError::Fatal(msg));
                }
                Err(FetchFailure::Transient(msg)) => {
                    self.breaker.record_failure();
                    self.record(
                        attempt,
                        AttemptOutcome::RetryableFailure(msg.clone()),
                        started.elapsed(),
                    );

                    if self.breaker.state() == BreakerState::Open {
                        warn!(operation = %self.operation, attempt, "circuit breaker opened");
                        return Err(RetryError::CircuitOpen);
                    }
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            operation = %self.operation,
                            attempts = attempt,
                            error = %msg,
                            "retries exhausted"
                        );
                        return Err(RetryError::RetriesExhausted {
                            attempts: attempt,
                            last_error: msg,
                        });
                    }

                    let delay = self.policy.jittered(self.policy.delay_for_attempt(attempt));
                    debug!(
                        operation = %self.operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "retrying after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn record(&mut self, attempt: u32, outcome: AttemptOutcome, elapsed: Duration) {
        let record = AttemptRecord {
            operation: self.operation.clone(),
            attempt,
            outcome,
            elapsed,
        };
        debug!(
            operation = %record.operation,
            attempt = record.attempt,
            elapsed_ms = record.elapsed.as_millis() as u64,
            outcome = ?record.outcome,
            "attempt finished"
        );
        if self.history.len() == ATTEMPT_HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 8,
            jitter_fraction: 0.0,
        }
    }

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(threshold, Duration::from_millis(cooldown_ms))
    }

    #[test]
    fn backoff_delays_follow_the_capped_exponential_law() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 5000,
            jitter_fraction: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        // Capped at max_delay from here on.
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_stays_within_the_configured_fraction() {
        let policy = RetryPolicy {
            jitter_fraction: 0.5,
            ..fast_policy(3)
        };
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let jittered = policy.jittered(base).as_millis() as u64;
            assert!((500..=1500).contains(&jittered), "jittered delay {jittered}ms out of range");
        }
    }

    #[tokio::test]
    async fn succeeds_first_try_without_touching_the_breaker() {
        let mut exec = RetryExecutor::new("op", fast_policy(3), breaker(5, 1000));
        let cancel = CancelFlag::new();

        let result: Result<u32, _> = exec.execute(&cancel, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(exec.breaker_state(), BreakerState::Closed);
        assert_eq!(exec.history().len(), 1);
        assert_eq!(exec.history()[0].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let mut exec = RetryExecutor::new("op", fast_policy(5), breaker(10, 1000));
        let cancel = CancelFlag::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result = exec
            .execute(&cancel, move || {
                let calls = calls_in.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchFailure::Transient("hiccup".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Success resets the consecutive-failure streak.
        assert_eq!(exec.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn fatal_failure_aborts_without_retry_or_breaker_count() {
        let mut exec = RetryExecutor::new("op", fast_policy(5), breaker(1, 1000));
        let cancel = CancelFlag::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result: Result<(), _> = exec
            .execute(&cancel, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchFailure::Fatal("bad target".into()))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), RetryError::Fatal("bad target".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Threshold is 1, but fatal failures never trip the breaker.
        assert_eq!(exec.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn exhausts_attempts_at_the_configured_maximum() {
        let mut exec = RetryExecutor::new("op", fast_policy(3), breaker(10, 1000));
        let cancel = CancelFlag::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result: Result<(), _> = exec
            .execute(&cancel, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchFailure::Transient("still down".into()))
                }
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            RetryError::RetriesExhausted {
                attempts: 3,
                last_error: "still down".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn breaker_opens_at_threshold_and_short_circuits_without_invoking() {
        let mut exec = RetryExecutor::new("op", fast_policy(2), breaker(3, 60_000));
        let cancel = CancelFlag::new();

        // Two failed execute calls: 2 + 1 transient failures reach the threshold.
        let _ = exec
            .execute::<(), _, _>(&cancel, || async { Err(FetchFailure::Transient("x".into())) })
            .await;
        let second = exec
            .execute::<(), _, _>(&cancel, || async { Err(FetchFailure::Transient("x".into())) })
            .await;
        assert_eq!(second.unwrap_err(), RetryError::CircuitOpen);
        assert_eq!(exec.breaker_state(), BreakerState::Open);

        // Cool-down has not elapsed: the operation must not run at all.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<(), _> = exec
            .execute(&cancel, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert_eq!(result.unwrap_err(), RetryError::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_the_breaker() {
        let mut breaker = breaker(2, 20);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());

        tokio::time::sleep(Duration::from_millis(30)).await;
        // Cool-down elapsed: exactly one probe is allowed through.
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens_and_restarts_the_cooldown() {
        let mut breaker = breaker(1, 20);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.try_acquire());
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Open);
        // Cool-down restarted: still short-circuiting.
        assert!(!breaker.try_acquire());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_backoff_sleep() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter_fraction: 0.0,
        };
        let mut exec = RetryExecutor::new("op", policy, breaker(10, 1000));
        let cancel = CancelFlag::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.request_stop();
        });

        let started = Instant::now();
        let result: Result<(), _> = exec
            .execute(&cancel, || async { Err(FetchFailure::Transient("down".into())) })
            .await;

        assert_eq!(result.unwrap_err(), RetryError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2), "stop should not wait out the backoff");
    }
}
