//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use confab_types::AiError;

/// Immutable backoff policy.
///
/// The interval grows by `multiplier` on every failed attempt, perturbed by
/// up to `random_factor` in either direction and capped at `max_interval`.
/// Jitter exists to desynchronize concurrent retries against the same
/// backend.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total invocation budget, including the first attempt.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Relative jitter amplitude in `[0, 1]`.
    pub random_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            random_factor: 0.2,
        }
    }
}

/// Compute the backoff interval that follows `current`.
///
/// `jitter_unit` is a uniform sample from `[-1, 1]`; it is a parameter (not
/// sampled here) so the arithmetic is testable without randomness:
///
/// `next = min(max_interval, current * multiplier * (1 + random_factor * jitter_unit))`
#[must_use]
pub fn next_interval(current: Duration, policy: &RetryPolicy, jitter_unit: f64) -> Duration {
    let jitter = jitter_unit.clamp(-1.0, 1.0);
    let scaled =
        current.as_secs_f64() * policy.multiplier * policy.random_factor.mul_add(jitter, 1.0);
    let capped = scaled.min(policy.max_interval.as_secs_f64()).max(0.0);
    Duration::from_secs_f64(capped)
}

/// Invoke `op` up to `policy.max_attempts` times.
///
/// - First success returns immediately.
/// - Non-retryable errors ([`AiError::is_retryable`] false -- validation,
///   permanent API rejections, timeouts, and the breaker's
///   [`AiError::CircuitOpen`] sentinel) are returned unchanged without
///   consuming further attempts.
/// - Transient failures sleep for the next backoff interval and retry.
///   Dropping the returned future aborts a pending sleep.
/// - Exhaustion returns an aggregate transient error wrapping the last
///   failure.
///
/// `op` receives the 1-based attempt number for observability.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, AiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut interval = policy.initial_interval;
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AiError::TransientApi { provider, message })
                if attempt < policy.max_attempts =>
            {
                let jitter_unit = rand::random::<f64>().mul_add(2.0, -1.0);
                interval = next_interval(interval, policy, jitter_unit);
                tracing::debug!(
                    provider,
                    %message,
                    attempt,
                    delay_ms = interval.as_millis(),
                    "retrying after transient failure"
                );
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
            Err(AiError::TransientApi { provider, message }) => {
                return Err(AiError::TransientApi {
                    provider,
                    message: format!("{attempt} attempts exhausted; last error: {message}"),
                });
            }
            Err(error) => {
                tracing::debug!(%error, attempt, "not retryable, giving up");
                return Err(error);
            }
        }
    }
}
