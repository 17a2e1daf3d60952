//! User profile and bot identity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured knowledge about one chat participant.
///
/// One record per `user_id`. Empty string fields mean "no information", not
/// "known to be empty" -- the profile extractor's merge preserves existing
/// values when an incoming field is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub display_names: String,
    pub origin_location: String,
    pub current_location: String,
    pub age_range: String,
    pub traits: String,
    pub last_updated: DateTime<Utc>,
}

impl UserProfile {
    /// The fixed profile for the bot's own identity.
    ///
    /// Never derived from model output; the extractor synthesizes this
    /// whenever the model mentions the bot's id.
    #[must_use]
    pub fn for_bot(bot: &BotIdentity, now: DateTime<Utc>) -> Self {
        Self {
            user_id: bot.user_id(),
            display_names: bot.display_name().to_string(),
            origin_location: "Internet".to_string(),
            current_location: String::new(),
            age_range: "N/A".to_string(),
            traits: "Group Chat Bot".to_string(),
            last_updated: now,
        }
    }

    /// True when every informational field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_names.is_empty()
            && self.origin_location.is_empty()
            && self.current_location.is_empty()
            && self.age_range.is_empty()
            && self.traits.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BotIdentityError {
    #[error("bot user_id must be positive, got {0}")]
    InvalidUserId(i64),
    #[error("bot username must not be empty")]
    EmptyUsername,
}

/// The bot's own identity, set once at startup before traffic begins.
///
/// Invariant: `user_id` is positive and `username` is non-empty, enforced at
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    user_id: i64,
    username: String,
    display_name: String,
}

impl BotIdentity {
    pub fn new(
        user_id: i64,
        username: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, BotIdentityError> {
        if user_id <= 0 {
            return Err(BotIdentityError::InvalidUserId(user_id));
        }
        let username = username.into();
        if username.trim().is_empty() {
            return Err(BotIdentityError::EmptyUsername);
        }
        Ok(Self {
            user_id,
            username,
            display_name: display_name.into(),
        })
    }

    #[must_use]
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Falls back to the username when no display name was provided.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BotIdentity, BotIdentityError, UserProfile};

    #[test]
    fn bot_identity_rejects_zero_user_id() {
        let err = BotIdentity::new(0, "confab_bot", "Confab").unwrap_err();
        assert_eq!(err, BotIdentityError::InvalidUserId(0));
    }

    #[test]
    fn bot_identity_rejects_negative_user_id() {
        assert!(BotIdentity::new(-5, "confab_bot", "Confab").is_err());
    }

    #[test]
    fn bot_identity_rejects_blank_username() {
        let err = BotIdentity::new(99, "  ", "Confab").unwrap_err();
        assert_eq!(err, BotIdentityError::EmptyUsername);
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let bot = BotIdentity::new(99, "confab_bot", "").unwrap();
        assert_eq!(bot.display_name(), "confab_bot");
    }

    #[test]
    fn bot_profile_uses_fixed_sentinels() {
        let bot = BotIdentity::new(99, "confab_bot", "Confab").unwrap();
        let profile = UserProfile::for_bot(&bot, chrono::Utc::now());
        assert_eq!(profile.user_id, 99);
        assert_eq!(profile.display_names, "Confab");
        assert_eq!(profile.origin_location, "Internet");
        assert_eq!(profile.age_range, "N/A");
        assert_eq!(profile.traits, "Group Chat Bot");
    }

    #[test]
    fn is_empty_ignores_user_id_and_timestamp() {
        let profile = UserProfile {
            user_id: 7,
            ..UserProfile::default()
        };
        assert!(profile.is_empty());
    }
}
