//! GenerateContent style backend.
//!
//! Speaks the contents/candidates wire shape against
//! `{base_url}/models/{model}:generateContent`. The system prompt travels in
//! the top-level `systemInstruction` field; roles are `user`/`model`; safety
//! thresholds and an optional google_search grounding tool ride along in
//! every request.
//!
//! # Turn Coalescing
//!
//! The API rejects two consecutive turns with the same role, so adjacent
//! same-role turns are merged into one `contents` entry with their texts
//! joined by newlines. No content is lost.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};

use confab_config::AiConfig;
use confab_types::{AiError, BotIdentity, ChatMessage, CompletionRequest, UserProfile};

use crate::prompt::{self, Turn, TurnRole};
use crate::{classify_error_response, classify_transport_error, http_client};

pub(crate) const PROVIDER: &str = "gemini";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_ONLY_HIGH";

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<WireUsage>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<WirePromptFeedback>,
}

#[derive(Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

#[derive(Deserialize)]
struct WirePromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

/// Merge adjacent same-role turns and encode into `contents` entries.
fn build_contents(turns: &[Turn]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();
    let mut index = 0;
    while index < turns.len() {
        let role = turns[index].role;
        let mut text = turns[index].text.clone();
        index += 1;
        while index < turns.len() && turns[index].role == role {
            text.push('\n');
            text.push_str(&turns[index].text);
            index += 1;
        }
        contents.push(json!({
            "role": match role {
                TurnRole::User => "user",
                TurnRole::Assistant => "model",
            },
            "parts": [{ "text": text }]
        }));
    }
    contents
}

fn safety_settings() -> Vec<Value> {
    SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": SAFETY_THRESHOLD }))
        .collect()
}

pub struct GeminiBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    temperature: f64,
    search_grounding: bool,
}

impl GeminiBackend {
    #[must_use]
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: http_client().clone(),
            url: format!(
                "{}/models/{}:generateContent",
                config.base_url(),
                config.model()
            ),
            api_key: config.api_key().to_string(),
            temperature: config.temperature(),
            search_grounding: config.gemini_search_grounding(),
        }
    }

    pub async fn generate_response(
        &self,
        request: &CompletionRequest,
        bot: Option<&BotIdentity>,
    ) -> Result<String, AiError> {
        let system = prompt::system_prompt(bot, &request.user_profiles);
        let turns = prompt::conversation_turns(request, bot);
        self.complete(&system, &turns, self.search_grounding).await
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
        // Grounding is for conversational replies; extraction must stick to
        // the transcript.
        self.complete(&system, &turns, false).await
    }

    async fn complete(
        &self,
        system: &str,
        turns: &[Turn],
        search_grounding: bool,
    ) -> Result<String, AiError> {
        let mut body = json!({
            "contents": build_contents(turns),
            "systemInstruction": { "parts": [{ "text": system }] },
            "generationConfig": { "temperature": self.temperature },
            "safetySettings": safety_settings(),
        });
        if search_grounding {
            body["tools"] = json!([{ "google_search": {} }]);
        }

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
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

        if let Some(usage) = &parsed.usage_metadata {
            tracing::debug!(
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                total_tokens = usage.total_token_count,
                "gemini usage"
            );
        }

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(AiError::transient(PROVIDER, format!("prompt blocked: {reason}")));
        }

        let candidate = parsed
            .candidates
            .first()
            .ok_or_else(|| AiError::transient(PROVIDER, "response contained no candidates"))?;

        if let Some(reason) = &candidate.finish_reason
            && matches!(reason.as_str(), "SAFETY" | "RECITATION" | "BLOCKLIST")
        {
            return Err(AiError::transient(
                PROVIDER,
                format!("completion blocked, finish reason {reason}"),
            ));
        }

        let text = candidate
            .content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(AiError::transient(PROVIDER, "completion was empty"));
        }
        Ok(text)
    }
}
