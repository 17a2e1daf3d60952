//! Turning free-form model output into mergeable profile records.
//!
//! Models rarely return bare JSON: the payload is usually wrapped in prose,
//! code fences, or both. The extractor isolates the outermost JSON object
//! span, decodes the known field set, and merges the result against
//! existing profile state with preserve-on-empty semantics -- an empty
//! incoming field means "no new information", never "clear this field".

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use confab_types::{AiError, BotIdentity, ChatMessage, UserProfile};

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    users: HashMap<String, RawFields>,
}

/// Known profile fields. Anything else in the payload is ignored.
#[derive(Debug, Default, Deserialize)]
struct RawFields {
    #[serde(default)]
    display_names: String,
    #[serde(default)]
    origin_location: String,
    #[serde(default)]
    current_location: String,
    #[serde(default)]
    age_range: String,
    #[serde(default)]
    traits: String,
}

/// Preserve-on-empty: an empty incoming value keeps whatever was stored.
fn merge_field(incoming: &str, existing: &str) -> String {
    let incoming = incoming.trim();
    if incoming.is_empty() {
        existing.to_string()
    } else {
        incoming.to_string()
    }
}

/// Isolate the outermost `{ ... }` span from model text.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse raw model text into updated profile records.
///
/// - `batch_messages`: the analyzed messages grouped by author id. Ids the
///   model mentions that have no messages here **and** no entry in
///   `existing` are dropped -- the model may not fabricate profiles for
///   uninvolved users.
/// - `existing` is never mutated; the returned map contains only ids that
///   were created or updated by this call.
/// - The bot's own id always yields the fixed synthesized profile rather
///   than trusting model output.
pub fn extract_profiles(
    raw_text: &str,
    batch_messages: &HashMap<i64, Vec<ChatMessage>>,
    existing: &HashMap<i64, UserProfile>,
    bot: Option<&BotIdentity>,
    now: DateTime<Utc>,
) -> Result<HashMap<i64, UserProfile>, AiError> {
    let trimmed = raw_text.trim();
    if trimmed.is_empty() {
        return Err(AiError::Parse("model returned empty text".to_string()));
    }

    let span = json_span(trimmed)
        .ok_or_else(|| AiError::Parse("no JSON object found in model output".to_string()))?;

    let payload: RawPayload = serde_json::from_str(span)
        .map_err(|e| AiError::Parse(format!("invalid profile JSON: {e}")))?;

    let mut updated = HashMap::new();
    for (key, fields) in &payload.users {
        let Ok(user_id) = key.parse::<i64>() else {
            tracing::warn!(%key, "skipping non-numeric user id in profile payload");
            continue;
        };
        if user_id <= 0 {
            tracing::warn!(user_id, "skipping non-positive user id in profile payload");
            continue;
        }

        // The bot's profile is an invariant, not model output.
        if let Some(bot) = bot
            && bot.user_id() == user_id
        {
            updated.insert(user_id, UserProfile::for_bot(bot, now));
            continue;
        }

        let prior = existing.get(&user_id);
        if prior.is_none() && !batch_messages.contains_key(&user_id) {
            tracing::debug!(user_id, "dropping profile for user absent from batch and store");
            continue;
        }

        let empty = UserProfile::default();
        let prior = prior.unwrap_or(&empty);
        updated.insert(
            user_id,
            UserProfile {
                user_id,
                display_names: merge_field(&fields.display_names, &prior.display_names),
                origin_location: merge_field(&fields.origin_location, &prior.origin_location),
                current_location: merge_field(&fields.current_location, &prior.current_location),
                age_range: merge_field(&fields.age_range, &prior.age_range),
                traits: merge_field(&fields.traits, &prior.traits),
                last_updated: now,
            },
        );
    }

    tracing::debug!(
        parsed = payload.users.len(),
        updated = updated.len(),
        "profile extraction complete"
    );
    Ok(updated)
}
