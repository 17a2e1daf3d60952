//! Provider-independent prompt construction and role mapping.
//!
//! Both backends build the same logical conversation; only the wire encoding
//! differs. Profile renderings are sorted by user id so prompts are
//! deterministic across calls with identical state.

use std::collections::HashMap;

use confab_types::{BotIdentity, ChatMessage, CompletionRequest, UserProfile};

/// Provider-agnostic role. Each backend maps this onto its own vocabulary
/// (`assistant` for chat-completions, `model` for generateContent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnRole {
    User,
    Assistant,
}

/// One logical conversation turn, chronological order preserved.
#[derive(Debug, Clone)]
pub(crate) struct Turn {
    pub role: TurnRole,
    pub text: String,
}

fn role_for(user_id: i64, bot: Option<&BotIdentity>) -> TurnRole {
    if bot.is_some_and(|b| b.user_id() == user_id) {
        TurnRole::Assistant
    } else {
        TurnRole::User
    }
}

/// Label a user-authored message so the model can tell speakers apart in a
/// group chat. The bot's own turns are passed through unlabeled.
fn turn_text(message: &ChatMessage, role: TurnRole) -> String {
    match role {
        TurnRole::Assistant => message.content.clone(),
        TurnRole::User => format!("[user {}] {}", message.user_id, message.content),
    }
}

/// Map history plus the current message into logical turns.
///
/// Messages authored by the bot's own user id become assistant turns, all
/// others user turns; the current message is appended last.
pub(crate) fn conversation_turns(
    request: &CompletionRequest,
    bot: Option<&BotIdentity>,
) -> Vec<Turn> {
    let mut turns: Vec<Turn> = request
        .recent_messages
        .iter()
        .map(|message| {
            let role = role_for(message.user_id, bot);
            Turn {
                role,
                text: turn_text(message, role),
            }
        })
        .collect();

    turns.push(Turn {
        role: TurnRole::User,
        text: format!("[user {}] {}", request.user_id, request.message),
    });
    turns
}

fn render_profile(profile: &UserProfile) -> String {
    let mut fields = Vec::new();
    if !profile.display_names.is_empty() {
        fields.push(format!("names: {}", profile.display_names));
    }
    if !profile.origin_location.is_empty() {
        fields.push(format!("from: {}", profile.origin_location));
    }
    if !profile.current_location.is_empty() {
        fields.push(format!("lives in: {}", profile.current_location));
    }
    if !profile.age_range.is_empty() {
        fields.push(format!("age: {}", profile.age_range));
    }
    if !profile.traits.is_empty() {
        fields.push(format!("traits: {}", profile.traits));
    }
    if fields.is_empty() {
        "no known details".to_string()
    } else {
        fields.join("; ")
    }
}

/// Render known profiles sorted by user id, one line each.
fn render_profiles(profiles: &HashMap<i64, UserProfile>) -> String {
    let mut ids: Vec<i64> = profiles.keys().copied().collect();
    ids.sort_unstable();
    ids.iter()
        .map(|id| format!("- user {}: {}", id, render_profile(&profiles[id])))
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for reply generation: bot identity plus a deterministic
/// rendering of everything known about the participants.
pub(crate) fn system_prompt(
    bot: Option<&BotIdentity>,
    profiles: &HashMap<i64, UserProfile>,
) -> String {
    let mut prompt = String::new();
    match bot {
        Some(bot) => {
            prompt.push_str(&format!(
                "You are {} (@{}), a participant in a group chat. \
                 Reply naturally and concisely to the conversation. \
                 User messages are prefixed with [user <id>] so you can tell \
                 speakers apart; never use that prefix in your own replies.",
                bot.display_name(),
                bot.username()
            ));
        }
        None => {
            prompt.push_str(
                "You are a participant in a group chat. Reply naturally and \
                 concisely. User messages are prefixed with [user <id>]; never \
                 use that prefix in your own replies.",
            );
        }
    }

    if !profiles.is_empty() {
        prompt.push_str("\n\nWhat you know about the participants:\n");
        prompt.push_str(&render_profiles(profiles));
    }
    prompt
}

/// Instruction prompt for profile extraction. The expected output shape is
/// spelled out verbatim; the extractor tolerates surrounding prose and code
/// fences anyway.
pub(crate) fn profile_system_prompt(bot: Option<&BotIdentity>) -> String {
    let mut prompt = String::from(
        "You analyze group chat transcripts and extract facts about the \
         participants. Respond with a single JSON object of the form:\n\
         {\"users\": {\"<user_id>\": {\"display_names\": \"\", \
         \"origin_location\": \"\", \"current_location\": \"\", \
         \"age_range\": \"\", \"traits\": \"\"}}}\n\
         Only include users that appear in the transcript. Use an empty \
         string for any field the transcript gives no new information about. \
         Do not invent facts.",
    );
    if let Some(bot) = bot {
        prompt.push_str(&format!(
            "\nUser {} is you, the bot; do not profile yourself.",
            bot.user_id()
        ));
    }
    prompt
}

/// Transcript plus existing profile state for the extraction request.
pub(crate) fn profile_user_prompt(
    messages: &[ChatMessage],
    existing: &HashMap<i64, UserProfile>,
) -> String {
    let mut prompt = String::from("Transcript:\n");
    for message in messages {
        prompt.push_str(&format!("[user {}] {}\n", message.user_id, message.content));
    }
    if !existing.is_empty() {
        prompt.push_str("\nExisting profiles (update or extend, do not repeat unchanged facts):\n");
        prompt.push_str(&render_profiles(existing));
        prompt.push('\n');
    }
    prompt.push_str("\nExtract the profile JSON now.");
    prompt
}
