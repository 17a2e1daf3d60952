//! Context-window management: token estimation and history selection.
//!
//! [`TokenEstimator`] approximates the token cost of arbitrary text with a
//! deliberate safety margin; [`select_context`] picks the largest recent
//! slice of chat history that fits a token budget. Neither performs IO.

mod selector;
mod token_estimator;

pub use selector::{MESSAGE_OVERHEAD_TOKENS, select_context};
pub use token_estimator::TokenEstimator;
