//! Chat-completions style REST backend.
//!
//! Speaks the `{model, messages, temperature}` request shape against
//! `{base_url}/chat/completions` and reads the single
//! `choices[0].message.content` response field. Works against OpenAI and any
//! compatible self-hosted endpoint via `base_url`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use confab_config::AiConfig;
use confab_types::{AiError, BotIdentity, ChatMessage, CompletionRequest, UserProfile};

use crate::prompt::{self, Turn, TurnRole};
use crate::{classify_error_response, classify_transport_error, http_client};

pub(crate) const PROVIDER: &str = "openai";

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f64,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Error payloads that occasionally arrive with a 200 status. Quota and
/// request-shape failures are permanent; everything else may clear.
fn classify_inline_error(error: &WireError) -> AiError {
    let permanent = matches!(
        error.kind.as_str(),
        "invalid_request_error" | "insufficient_quota" | "authentication_error"
    );
    if permanent {
        AiError::permanent(PROVIDER, 200, format!("{}: {}", error.kind, error.message))
    } else {
        AiError::transient(PROVIDER, format!("{}: {}", error.kind, error.message))
    }
}

pub struct OpenAiBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl OpenAiBackend {
    #[must_use]
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: http_client().clone(),
            url: format!("{}/chat/completions", config.base_url()),
            api_key: config.api_key().to_string(),
            model: config.model().to_string(),
            temperature: config.temperature(),
        }
    }

    pub async fn generate_response(
        &self,
        request: &CompletionRequest,
        bot: Option<&BotIdentity>,
    ) -> Result<String, AiError> {
        let system = prompt::system_prompt(bot, &request.user_profiles);
        let turns = prompt::conversation_turns(request, bot);
        self.complete(&system, &turns).await
    }

    pub async fn generate_profiles(
        &self,
        messages: &[ChatMessage],
        existing: &HashMap<i64, UserProfile>,
        bot: Option<&BotIdentity>,
    ) -> Result<String, AiError> {
        let system = prompt::profile_system_prompt(bot);
        let turns = [Turn {
            role: TurnRole::User,
            text: prompt::profile_user_prompt(messages, existing),
        }];
        self.complete(&system, &turns).await
    }

    async fn complete(&self, system: &str, turns: &[Turn]) -> Result<String, AiError> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system.to_string(),
        });
        messages.extend(turns.iter().map(|turn| WireMessage {
            role: match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            },
            content: turn.text.clone(),
        }));

        let body = WireRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(PROVIDER, &e))?;

        if !response.status().is_success() {
            return Err(classify_error_response(PROVIDER, response).await);
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| AiError::transient(PROVIDER, format!("malformed response body: {e}")))?;

        if let Some(error) = &parsed.error {
            return Err(classify_inline_error(error));
        }

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "openai usage"
            );
        }

        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| AiError::transient(PROVIDER, "response contained no choices"))?;

        if let Some(reason) = &choice.finish_reason
            && reason == "content_filter"
        {
            return Err(AiError::transient(PROVIDER, "completion blocked by content filter"));
        }

        let text = choice
            .message
            .content
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(AiError::transient(PROVIDER, "completion was empty"));
        }
        Ok(text)
    }
}
