//! Core domain types shared across the Confab workspace.
//!
//! This crate is deliberately free of IO and async code. It holds the chat
//! domain model ([`ChatMessage`], [`UserProfile`], [`BotIdentity`],
//! [`CompletionRequest`]) and the error taxonomy ([`AiError`]) that every
//! other crate classifies against.

mod error;
mod message;
mod profile;

pub use error::AiError;
pub use message::{ChatMessage, CompletionRequest};
pub use profile::{BotIdentity, BotIdentityError, UserProfile};
