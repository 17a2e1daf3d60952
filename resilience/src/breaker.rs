//! Three-state circuit breaker.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use confab_types::AiError;

/// Breaker state. Transitions:
///
/// ```text
/// Closed --max_failures consecutive failures--> Open
/// Open   --reset_interval elapsed-------------> HalfOpen
/// HalfOpen --any failure----------------------> Open
/// HalfOpen --half_open_limit successes--------> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::HalfOpen => f.write_str("half-open"),
            Self::Open => f.write_str("open"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before tripping to Open.
    pub max_failures: u32,
    /// How long Open lasts before the first trial is admitted.
    pub reset_interval: Duration,
    /// Trial budget in HalfOpen; this many successes close the breaker.
    pub half_open_limit: u32,
    /// Deadline applied to every admitted call.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_interval: Duration::from_secs(30),
            half_open_limit: 1,
            call_timeout: Duration::from_secs(30),
        }
    }
}

type StateListener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

/// Fail-fast guard around a flaky dependency.
///
/// Counters live behind a mutex; the breaker is safe for concurrent use and
/// never holds the lock across an await point.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<StateListener>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
            }),
            listener: None,
        }
    }

    /// Subscribe to state transitions. Invoked as `(from, to)` on every
    /// transition, under the state lock -- listeners must be cheap.
    #[must_use]
    pub fn with_state_listener(
        mut self,
        listener: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::warn!(%from, %to, "circuit breaker state change");
        if let Some(listener) = &self.listener {
            listener(from, to);
        }
    }

    /// Admission check. Returns `Err(CircuitOpen)` without invoking anything
    /// when the breaker is rejecting calls.
    fn before_call(&self) -> Result<(), AiError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed());
                if elapsed.is_some_and(|e| e >= self.config.reset_interval) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_in_flight = 1;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(AiError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_limit {
                    return Err(AiError::CircuitOpen);
                }
                inner.half_open_in_flight += 1;
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_limit {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    inner.half_open_in_flight = 0;
                    inner.half_open_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.max_failures {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = 0;
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` through the breaker with the configured deadline.
    ///
    /// - Open: fails immediately with [`AiError::CircuitOpen`]; `op` is not
    ///   invoked.
    /// - A call outliving `call_timeout` is classified as
    ///   [`AiError::Timeout`], distinct from other failures, and counts
    ///   against the breaker.
    /// - Dropping the returned future aborts `op` (and its deadline) without
    ///   recording an outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, AiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        self.before_call()?;

        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Timeout {
                elapsed: started.elapsed(),
            }),
        };

        match &result {
            Ok(_) => self.on_success(),
            Err(error) => {
                tracing::debug!(%error, state = %self.state(), "breaker recorded failure");
                self.on_failure();
            }
        }
        result
    }
}
