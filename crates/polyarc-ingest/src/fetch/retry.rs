//! Exponential backoff with jitter

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry budget and delay curve.
///
/// The delay before retry `n` (1-based) is `min(cap, base * 2^n)` plus a
/// uniform jitter in `[0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl BackoffPolicy {
    /// Deterministic part of the delay before retry `attempt`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + random_jitter(self.jitter)
    }
}

/// Uniform random duration in `[0, max)`
pub fn random_jitter(max: Duration) -> Duration {
    let micros = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
    if micros == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::thread_rng().gen_range(0..micros))
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The predicate declared the error not worth retrying
    Fatal(E),
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
            Err(err) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                })
            },
            Err(err) => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
