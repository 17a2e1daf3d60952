//! Chat message domain model.
//!
//! Messages are owned by the external storage collaborator; this crate only
//! ever reads them. Constructors take timestamps explicitly; callers own the
//! clock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::UserProfile;

/// A single message from the chat history.
///
/// Immutable once created. `user_id` identifies the author; messages written
/// by the bot itself carry the bot's own id and are mapped to the
/// assistant/model role when a provider request is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: i64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(user_id: i64, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id,
            content: content.into(),
            timestamp,
        }
    }
}

/// Everything a backend needs to produce one reply.
///
/// Constructed per call and not persisted. `recent_messages` is ordered
/// oldest to newest; `user_profiles` carries whatever profile state the
/// caller has on hand for participants.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub user_id: i64,
    pub message: String,
    pub recent_messages: Vec<ChatMessage>,
    pub user_profiles: HashMap<i64, UserProfile>,
}

impl CompletionRequest {
    /// Check the fields a backend cannot work without.
    pub fn validate(&self) -> Result<(), crate::AiError> {
        if self.user_id <= 0 {
            return Err(crate::AiError::Validation(format!(
                "request user_id must be positive, got {}",
                self.user_id
            )));
        }
        if self.message.trim().is_empty() {
            return Err(crate::AiError::Validation(
                "request message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
