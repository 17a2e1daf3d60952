//! Failure handling around backend calls.
//!
//! Two cooperating layers, both provider-agnostic:
//!
//! - [`CircuitBreaker`]: a classic three-state breaker
//!   (Closed -> Open -> Half-Open) that fails fast with
//!   [`confab_types::AiError::CircuitOpen`] while a dependency looks down,
//!   and bounds every admitted call with a deadline.
//! - [`with_retry`]: bounded retries with exponential backoff and jitter,
//!   driven purely by [`confab_types::AiError::is_retryable`] -- the retry
//!   loop never inspects provider specifics, and the breaker's open-state
//!   error passes through unchanged so callers can special-case it.
//!
//! Backoff arithmetic is a pure function ([`next_interval`]) so the policy
//! is testable without executing real sleeps.

mod breaker;
mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use retry::{RetryPolicy, next_interval, with_retry};
