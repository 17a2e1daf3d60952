//! Error taxonomy for the AI interaction layer.
//!
//! Classification happens at the lowest level that can decide it: provider
//! backends map wire responses to permanent or transient, the circuit
//! breaker owns [`AiError::CircuitOpen`] and [`AiError::Timeout`], and the
//! retry loop consults [`AiError::is_retryable`] without any
//! provider-specific knowledge.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    /// Caller-supplied input that can never succeed. Surfaced immediately.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The provider rejected the request in a way retrying cannot fix:
    /// malformed request, quota exhausted, bad credentials.
    #[error("{provider} rejected request (status {status}): {message}")]
    PermanentApi {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// A failure that may clear on its own: transport errors, 5xx, empty or
    /// safety-blocked completions.
    #[error("{provider} transient failure: {message}")]
    TransientApi {
        provider: &'static str,
        message: String,
    },

    /// The circuit breaker is rejecting calls without invoking the backend.
    /// Never retried; callers may degrade gracefully on this variant.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Profile JSON was missing or malformed. Fatal for that batch only.
    #[error("profile parse failed: {0}")]
    Parse(String),

    /// The per-call deadline elapsed. Terminal for this call.
    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },
}

impl AiError {
    /// Only transient API failures are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientApi { .. })
    }

    #[must_use]
    pub fn transient(provider: &'static str, message: impl Into<String>) -> Self {
        Self::TransientApi {
            provider,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn permanent(provider: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::PermanentApi {
            provider,
            status,
            message: message.into(),
        }
    }
}
