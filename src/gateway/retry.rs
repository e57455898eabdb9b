//! Retry with exponential backoff
//!
//! Wraps one logical provider call. Retryable failures are attempted again
//! after `base_delay * 2^attempt` (1s, 2s, 4s, ... by default); fatal
//! failures and the last allowed attempt surface immediately.
//!
//! Between attempts the shared circuit breaker is re-read. If another caller
//! opened it in the meantime, the loop stops instead of adding load to a
//! provider already known to be failing.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, warn};

use crate::constants::retry as retry_constants;
use crate::gateway::circuit_breaker::CircuitBreaker;
use crate::gateway::timeout::with_timeout;
use crate::types::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: retry_constants::MAX_RETRIES,
            base_delay: Duration::from_millis(retry_constants::BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Upper bound on one retried call: every attempt timing out, plus all backoff sleeps
    pub fn max_call_duration(&self, attempt_timeout: Duration) -> Duration {
        let sleeps = (0..self.max_retries)
            .map(|attempt| self.backoff_delay(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        attempt_timeout
            .saturating_mul(self.max_retries.saturating_add(1))
            .saturating_add(sleeps)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_delay(self.backoff_delay(self.max_retries))
            .with_max_times(self.max_retries as usize)
    }
}

/// Why the retry loop ended without a response
#[derive(Debug, Clone)]
pub enum RetryError {
    /// Last provider failure (fatal, or retries exhausted)
    Provider(ProviderError),
    /// The breaker opened while retrying; no further attempt was made
    CircuitOpen { retry_after: Duration },
}

/// Result of a retried call along with how many provider attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RetryError>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            policy,
            attempt_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails fatally, or retries run out.
    ///
    /// Each attempt is bounded by the executor's attempt timeout. When a
    /// breaker is given it is consulted (read-only) before every retry.
    pub async fn execute<T, F, Fut>(
        &self,
        breaker: Option<&CircuitBreaker>,
        mut call: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let invocations = AtomicU32::new(0);
        let attempts = AtomicU32::new(0);
        let timeout = self.attempt_timeout;

        let result = (|| {
            let invocation = invocations.fetch_add(1, Ordering::SeqCst);
            let attempts = &attempts;
            let fut = call();
            async move {
                if invocation > 0
                    && let Some(breaker) = breaker
                    && let Some(retry_after) = breaker.open_cooldown().await
                {
                    return Err(RetryError::CircuitOpen { retry_after });
                }
                attempts.fetch_add(1, Ordering::SeqCst);
                with_timeout(timeout, fut).await.map_err(RetryError::Provider)
            }
        })
        .retry(self.policy.backoff())
        .sleep(tokio::time::sleep)
        .when(|err: &RetryError| matches!(err, RetryError::Provider(e) if e.is_retryable()))
        .notify(|err: &RetryError, delay: Duration| {
            if let RetryError::Provider(e) = err {
                warn!(
                    class = %e.class,
                    delay_ms = delay.as_millis() as u64,
                    "Provider call failed, retrying: {}",
                    e
                );
            }
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match &result {
            Ok(_) if attempts > 1 => debug!(attempts, "Provider call succeeded after retry"),
            Err(RetryError::CircuitOpen { .. }) => {
                debug!(attempts, "Retry loop stopped, circuit opened")
            }
            _ => {}
        }

        RetryOutcome { result, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::circuit_breaker::CircuitBreakerConfig;
    use crate::gateway::clock::ManualClock;
    use crate::gateway::store::{KeySpace, MemoryStore};
    use crate::types::ErrorClass;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_secs(1),
            },
            Duration::from_secs(120),
        )
    }

    #[test]
    fn test_backoff_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_call_duration_covers_every_attempt_and_sleep() {
        let policy = RetryPolicy::default();
        // 4 attempts of 120s plus 1s + 2s + 4s of backoff
        assert_eq!(
            policy.max_call_duration(Duration::from_secs(120)),
            Duration::from_secs(487)
        );

        let once = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(
            once.max_call_duration(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    proptest! {
        #[test]
        fn prop_backoff_doubles(base_ms in 1u64..10_000, attempt in 0u32..16) {
            let policy = RetryPolicy { max_retries: 3, base_delay: Duration::from_millis(base_ms) };
            prop_assert_eq!(policy.backoff_delay(attempt + 1), policy.backoff_delay(attempt) * 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_max_times() {
        let exec = executor(3);
        let start = Instant::now();

        let outcome: RetryOutcome<()> = exec
            .execute(None, || async {
                Err(ProviderError::new(ErrorClass::ServerError, "boom").status(500))
            })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert!(outcome.retried());
        assert!(matches!(
            outcome.result,
            Err(RetryError::Provider(ref e)) if e.class == ErrorClass::ServerError
        ));
        // 1s + 2s + 4s
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let exec = executor(3);
        let start = Instant::now();

        let outcome: RetryOutcome<()> = exec
            .execute(None, || async {
                Err(ProviderError::new(ErrorClass::Authentication, "bad key").status(401))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.retried());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let exec = executor(3);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let outcome = exec
            .execute(None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::new(ErrorClass::Unavailable, "down"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries() {
        let exec = executor(0);
        let outcome: RetryOutcome<()> = exec
            .execute(None, || async {
                Err(ProviderError::new(ErrorClass::Timeout, "slow"))
            })
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let exec = RetryExecutor::new(
            RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_secs(1),
            },
            Duration::from_secs(5),
        );
        let outcome: RetryOutcome<()> = exec
            .execute(None, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert!(matches!(
            outcome.result,
            Err(RetryError::Provider(ref e)) if e.class == ErrorClass::Timeout
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_breaker_opens_mid_loop() {
        let clock = Arc::new(ManualClock::fixed());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            store,
            clock,
            KeySpace::default(),
        );

        let exec = executor(3);
        let outcome: RetryOutcome<()> = exec
            .execute(Some(&breaker), || async {
                // another caller trips the breaker while this one is failing
                breaker.record_failure(ErrorClass::ServerError).await;
                Err(ProviderError::new(ErrorClass::ServerError, "boom"))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.result,
            Err(RetryError::CircuitOpen { .. })
        ));
    }
}
