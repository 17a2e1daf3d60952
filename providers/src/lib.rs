//! LLM provider backends behind a single provider-agnostic contract.
//!
//! # Architecture
//!
//! The crate is organized around a provider dispatch pattern:
//!
//! - [`Backend`] - Tagged variant over the concrete backends, constructed
//!   exclusively by [`Backend::from_config`]
//! - [`openai`] - Chat-completions style REST client (system/user/assistant
//!   roles, single response field)
//! - [`gemini`] - GenerateContent style client (user/model roles, separate
//!   safety-rating and finish-reason fields, optional search grounding)
//!
//! Wire-format structs stay private to each backend module. Both backends
//! classify provider failures into the shared [`AiError`] taxonomy at the
//! response boundary, so the resilience layer upstream never needs
//! provider-specific knowledge:
//!
//! | Condition | Classification |
//! |-----------|----------------|
//! | 408, 429, 5xx, transport error | `TransientApi` |
//! | empty or safety-blocked completion | `TransientApi` |
//! | 4xx (malformed request, quota, auth) | `PermanentApi` |
//!
//! Backends return sanitized plain text; an empty completion is an error,
//! never an empty string.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use confab_config::{AiConfig, ProviderKind};
use confab_types::{AiError, BotIdentity, ChatMessage, CompletionRequest, UserProfile};

pub mod gemini;
pub mod openai;
mod prompt;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Process-wide HTTP client.
///
/// Request deadlines are owned by the resilience layer, so the client only
/// carries connection-level settings.
pub(crate) fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
            .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {e}. Falling back to defaults.");
                reqwest::Client::new()
            })
    })
}

/// Read an error body with a hard cap so provider errors cannot balloon logs.
pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(mut body) => {
            if body.len() > MAX_ERROR_BODY_BYTES {
                body.truncate(MAX_ERROR_BODY_BYTES);
                body.push_str("...(truncated)");
            }
            body
        }
        Err(e) => format!("<unreadable error body: {e}>"),
    }
}

/// Default retryable statuses, shared by both backends.
pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

/// Classify a non-success HTTP response into the shared error taxonomy.
pub(crate) async fn classify_error_response(
    provider: &'static str,
    response: reqwest::Response,
) -> AiError {
    let status = response.status();
    let body = read_capped_error_body(response).await;
    tracing::warn!(provider, status = status.as_u16(), "provider error response");
    if is_retryable_status(status) {
        AiError::transient(provider, format!("HTTP {status}: {body}"))
    } else {
        AiError::permanent(provider, status.as_u16(), body)
    }
}

/// Map a transport-level failure. All of these may clear on their own.
pub(crate) fn classify_transport_error(provider: &'static str, error: &reqwest::Error) -> AiError {
    AiError::transient(provider, format!("transport error: {error}"))
}

enum BackendKind {
    OpenAi(OpenAiBackend),
    Gemini(GeminiBackend),
}

/// Provider-agnostic backend handle.
///
/// Holds the bot identity shared by both operations. The identity is written
/// once at startup before traffic begins; concurrent reads are the common
/// case, hence the `RwLock`.
pub struct Backend {
    kind: BackendKind,
    bot: RwLock<Option<BotIdentity>>,
}

impl Backend {
    /// The one construction path: select the concrete backend from
    /// configuration.
    #[must_use]
    pub fn from_config(config: &AiConfig) -> Self {
        let kind = match config.provider() {
            ProviderKind::OpenAi => BackendKind::OpenAi(OpenAiBackend::new(config)),
            ProviderKind::Gemini => BackendKind::Gemini(GeminiBackend::new(config)),
        };
        Self {
            kind,
            bot: RwLock::new(None),
        }
    }

    /// Store the bot identity used for system prompts and role mapping.
    ///
    /// Validation lives in [`BotIdentity::new`]; an invalid identity is
    /// unrepresentable here.
    pub fn set_bot_info(&self, bot: BotIdentity) {
        tracing::debug!(user_id = bot.user_id(), username = bot.username(), "bot identity set");
        *self.bot.write().expect("bot identity lock poisoned") = Some(bot);
    }

    /// The currently stored bot identity, if any.
    #[must_use]
    pub fn bot_info(&self) -> Option<BotIdentity> {
        self.bot
            .read()
            .expect("bot identity lock poisoned")
            .clone()
    }

    /// Render the reply system prompt exactly as it will be sent, so callers
    /// can charge its token cost against the context budget.
    #[must_use]
    pub fn render_system_prompt(&self, profiles: &HashMap<i64, UserProfile>) -> String {
        prompt::system_prompt(self.bot_info().as_ref(), profiles)
    }

    /// Produce one reply for `request`. Returns sanitized plain text.
    pub async fn generate_response(&self, request: &CompletionRequest) -> Result<String, AiError> {
        request.validate()?;
        let bot = self.bot_info();
        match &self.kind {
            BackendKind::OpenAi(backend) => backend.generate_response(request, bot.as_ref()).await,
            BackendKind::Gemini(backend) => backend.generate_response(request, bot.as_ref()).await,
        }
    }

    /// Ask the model to extract profile facts from a message batch.
    ///
    /// Returns the raw model text; parsing and merging belong to the caller
    /// so both backends share one extractor.
    pub async fn generate_profiles(
        &self,
        messages: &[ChatMessage],
        existing: &HashMap<i64, UserProfile>,
    ) -> Result<String, AiError> {
        if messages.is_empty() {
            return Err(AiError::Validation(
                "profile extraction requires at least one message".to_string(),
            ));
        }
        let bot = self.bot_info();
        match &self.kind {
            BackendKind::OpenAi(backend) => {
                backend.generate_profiles(messages, existing, bot.as_ref()).await
            }
            BackendKind::Gemini(backend) => {
                backend.generate_profiles(messages, existing, bot.as_ref()).await
            }
        }
    }

    /// Provider name for logging.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        match &self.kind {
            BackendKind::OpenAi(_) => openai::PROVIDER,
            BackendKind::Gemini(_) => gemini::PROVIDER,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("provider", &self.provider_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use confab_config::{AiConfig, ProviderKind};
    use confab_types::BotIdentity;

    use super::Backend;

    #[test]
    fn factory_selects_variant_from_config() {
        let config =
            AiConfig::for_base_url(ProviderKind::OpenAi, "http://localhost:1", "k").unwrap();
        assert_eq!(Backend::from_config(&config).provider_name(), "openai");

        let config =
            AiConfig::for_base_url(ProviderKind::Gemini, "http://localhost:1", "k").unwrap();
        assert_eq!(Backend::from_config(&config).provider_name(), "gemini");
    }

    #[test]
    fn bot_identity_is_readable_after_set() {
        let config =
            AiConfig::for_base_url(ProviderKind::OpenAi, "http://localhost:1", "k").unwrap();
        let backend = Backend::from_config(&config);
        assert!(backend.bot_info().is_none());

        backend.set_bot_info(BotIdentity::new(9, "confab_bot", "Confab").unwrap());
        assert_eq!(backend.bot_info().unwrap().user_id(), 9);
    }

    #[tokio::test]
    async fn empty_profile_batch_is_a_validation_error() {
        let config =
            AiConfig::for_base_url(ProviderKind::OpenAi, "http://localhost:1", "k").unwrap();
        let backend = Backend::from_config(&config);
        let err = backend
            .generate_profiles(&[], &std::collections::HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, confab_types::AiError::Validation(_)));
    }
}
