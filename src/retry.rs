use std::{
    future::Future,
    time::{Duration, Instant},
};

use rand::Rng;
use tracing::{debug, warn};

use crate::common::{PlayerError, PlayerResult};

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff
/// `min(base * 2^attempt, max)`, jittered by up to ±25%. Permanent failures
/// abort immediately; once retries are exhausted the last error surfaces.
pub async fn with_retry<T, F, Fut>(mut operation: F, options: RetryOptions) -> PlayerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PlayerResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= options.max_retries || !err.is_retryable() {
                    return Err(err);
                }

                let exp = options
                    .base_delay
                    .saturating_mul(1u32 << attempt.min(16))
                    .min(options.max_delay);
                let delay = if options.jitter {
                    let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
                    exp.mul_f64(factor)
                } else {
                    exp
                };

                debug!(
                    "attempt {}/{} failed ({}), retrying in {:?}",
                    attempt + 1,
                    options.max_retries + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Short-circuits calls to a failing dependency. After `failure_threshold`
/// consecutive failures the breaker opens and rejects immediately; once
/// `reset_timeout` elapses a single trial call is allowed through, and its
/// outcome closes or re-opens the breaker.
pub struct CircuitBreaker {
    inner: parking_lot::Mutex<BreakerInner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: parking_lot::Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            reset_timeout,
        }
    }

    pub async fn execute<T, F, Fut>(&self, operation: F) -> PlayerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PlayerResult<T>>,
    {
        {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::Open {
                let cooled_down = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    inner.failures = 0;
                } else {
                    return Err(PlayerError::TransientUpstream(
                        "circuit breaker open, too many recent failures".to_string(),
                    ));
                }
            }
        }

        match operation().await {
            Ok(value) => {
                let mut inner = self.inner.lock();
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock();
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());
                if inner.state == BreakerState::HalfOpen
                    || inner.failures >= self.failure_threshold
                {
                    inner.state = BreakerState::Open;
                    warn!("circuit breaker opened after {} failure(s)", inner.failures);
                }
                Err(err)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().state == BreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn transient() -> PlayerError {
        PlayerError::TransientUpstream("connection reset".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retried_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();
        let started = tokio::time::Instant::now();

        let result = with_retry(
            move || {
                let calls = calls_op.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            },
            RetryOptions {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                jitter: false,
            },
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Backoff of 1s then 2s must have elapsed.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: PlayerResult<()> = with_retry(
            move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlayerError::PermanentUpstream("video unavailable".into()))
                }
            },
            RetryOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(PlayerError::PermanentUpstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();

        let result: PlayerResult<()> = with_retry(
            move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
            RetryOptions {
                max_retries: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
                jitter: false,
            },
        )
        .await;

        assert!(matches!(result, Err(PlayerError::TransientUpstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_capped_at_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_op = calls.clone();
        let started = tokio::time::Instant::now();

        let _: PlayerResult<()> = with_retry(
            move || {
                let calls = calls_op.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
            RetryOptions {
                max_retries: 4,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(15),
                jitter: false,
            },
        )
        .await;

        // 10 + 15 + 15 + 15, not 10 + 20 + 40 + 80.
        assert_eq!(started.elapsed(), Duration::from_secs(55));
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_rejects_without_invoking() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let _: PlayerResult<()> = breaker
                .execute(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                })
                .await;
        }
        assert!(breaker.is_open());

        // Rejected immediately; the operation must not run.
        let calls_trial = calls.clone();
        let result: PlayerResult<()> = breaker
            .execute(move || async move {
                calls_trial.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn breaker_half_open_trial_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));

        let _: PlayerResult<()> = breaker.execute(|| async { Err(transient()) }).await;
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = breaker.execute(|| async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn breaker_half_open_trial_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));

        let _: PlayerResult<()> = breaker.execute(|| async { Err(transient()) }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let _: PlayerResult<()> = breaker.execute(|| async { Err(transient()) }).await;
        assert!(breaker.is_open());
    }
}
