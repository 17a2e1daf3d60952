//! The AI interaction orchestrator.
//!
//! [`AiService`] is the single entry point the chat layer talks to. Each
//! operation runs the same pipeline:
//!
//! 1. validate the request,
//! 2. trim history to the token budget ([`confab_context`]),
//! 3. dispatch through retry and circuit breaker
//!    ([`confab_resilience`]) to the configured backend
//!    ([`confab_providers`]),
//! 4. post-process the model text (profile extraction lives in
//!    [`profile`]).
//!
//! The retry loop wraps the breaker, not the other way around: an open
//! breaker fails each attempt fast with a non-retryable error, so a dead
//! backend costs one admission check instead of a full backoff schedule.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use confab_config::AiConfig;
use confab_context::{MESSAGE_OVERHEAD_TOKENS, TokenEstimator, select_context};
use confab_providers::Backend;
use confab_resilience::{CircuitBreaker, CircuitState, RetryPolicy, with_retry};
use confab_types::{AiError, BotIdentity, ChatMessage, CompletionRequest, UserProfile};

pub mod profile;

pub use profile::extract_profiles;

/// Facade over context selection, resilience, and the provider backend.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and internal
/// state (breaker counters, bot identity) is synchronized.
pub struct AiService {
    backend: Backend,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    estimator: TokenEstimator,
    max_context_tokens: u32,
}

impl std::fmt::Debug for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiService")
            .field("provider", &self.backend.provider_name())
            .field("max_context_tokens", &self.max_context_tokens)
            .finish_non_exhaustive()
    }
}

impl AiService {
    #[must_use]
    pub fn new(config: &AiConfig) -> Self {
        Self {
            backend: Backend::from_config(config),
            breaker: CircuitBreaker::new(config.breaker()),
            retry: config.retry(),
            estimator: TokenEstimator::new(),
            max_context_tokens: config.max_context_tokens(),
        }
    }

    /// Store the bot identity used for system prompts, role mapping, and
    /// profile synthesis. Call once at startup before traffic begins.
    pub fn set_bot_info(&self, bot: BotIdentity) {
        self.backend.set_bot_info(bot);
    }

    /// Current breaker state, for health reporting.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Generate one reply for `request`.
    ///
    /// History is trimmed to the newest suffix that fits the token budget
    /// before anything reaches the wire; the caller's request is not
    /// mutated. Returns sanitized plain text, never an empty string.
    pub async fn generate_response(&self, request: &CompletionRequest) -> Result<String, AiError> {
        request.validate()?;
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let system_prompt = self.backend.render_system_prompt(&request.user_profiles);
        let system_tokens = self.estimator.estimate(&system_prompt);
        let current_tokens = self
            .estimator
            .estimate(&format!("[user {}] {}", request.user_id, request.message))
            + MESSAGE_OVERHEAD_TOKENS;

        let selected = select_context(
            &self.estimator,
            self.max_context_tokens,
            system_tokens,
            current_tokens,
            &request.recent_messages,
        );
        let trimmed = CompletionRequest {
            user_id: request.user_id,
            message: request.message.clone(),
            recent_messages: selected.to_vec(),
            user_profiles: request.user_profiles.clone(),
        };
        tracing::debug!(
            %request_id,
            system_tokens,
            current_tokens,
            history_total = request.recent_messages.len(),
            history_kept = trimmed.recent_messages.len(),
            "assembled completion request"
        );

        let result = with_retry(&self.retry, |attempt| {
            let trimmed = &trimmed;
            async move {
                tracing::debug!(%request_id, attempt, "dispatching completion");
                self.breaker
                    .execute(|| self.backend.generate_response(trimmed))
                    .await
            }
        })
        .await;

        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(text) => tracing::info!(
                %request_id,
                provider = self.backend.provider_name(),
                user_id = request.user_id,
                reply_chars = text.len(),
                elapsed_ms,
                "generated reply"
            ),
            Err(error) => tracing::warn!(
                %request_id,
                provider = self.backend.provider_name(),
                user_id = request.user_id,
                %error,
                elapsed_ms,
                "completion failed"
            ),
        }
        result
    }

    /// Extract profile facts from a batch of messages.
    ///
    /// Dispatches one extraction call through the resilience layer, then
    /// parses and merges the model output against `existing`. The returned
    /// map holds only profiles created or updated by this batch; `existing`
    /// is never mutated.
    pub async fn generate_profiles(
        &self,
        messages: &[ChatMessage],
        existing: &HashMap<i64, UserProfile>,
    ) -> Result<HashMap<i64, UserProfile>, AiError> {
        if messages.is_empty() {
            return Err(AiError::Validation(
                "profile extraction requires at least one message".to_string(),
            ));
        }
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let raw = with_retry(&self.retry, |attempt| async move {
            tracing::debug!(%request_id, attempt, "dispatching profile extraction");
            self.breaker
                .execute(|| self.backend.generate_profiles(messages, existing))
                .await
        })
        .await?;

        let batch = group_by_author(messages);
        let profiles = extract_profiles(
            &raw,
            &batch,
            existing,
            self.backend.bot_info().as_ref(),
            Utc::now(),
        )?;

        tracing::info!(
            %request_id,
            provider = self.backend.provider_name(),
            batch_messages = messages.len(),
            profiles_updated = profiles.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "extracted profiles"
        );
        Ok(profiles)
    }
}

/// Group a message batch by author id, preserving per-author order.
fn group_by_author(messages: &[ChatMessage]) -> HashMap<i64, Vec<ChatMessage>> {
    let mut grouped: HashMap<i64, Vec<ChatMessage>> = HashMap::new();
    for message in messages {
        grouped.entry(message.user_id).or_default().push(message.clone());
    }
    grouped
}
