//! Token estimation using tiktoken.
//!
//! Counts are **approximate**: the `o200k_base` encoding is exact for recent
//! OpenAI models and a reasonable stand-in for Gemini's proprietary
//! tokenizer. A fixed 20% safety margin is applied on top of the raw count
//! so the selector undercounts against the real provider tokenizer as rarely
//! as possible. Overcounting only wastes a little budget; undercounting
//! produces rejected requests.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, o200k_base};

/// The tiktoken encoder is expensive to initialize (loads vocabulary data),
/// so it is created once and shared across all `TokenEstimator` instances.
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Safety margin applied to every estimate: `ceil(raw * 1.2)`.
fn with_margin(raw: usize) -> u32 {
    let padded = (raw * 6).div_ceil(5);
    u32::try_from(padded).unwrap_or(u32::MAX)
}

/// Thread-safe approximate token counter.
///
/// `estimate` is deterministic, never fails, and is monotonically
/// non-decreasing in input length on both the tokenizer path and the
/// byte-length fallback path.
#[derive(Clone, Copy)]
pub struct TokenEstimator {
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TokenEstimator {
    #[must_use]
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            tracing::error!(
                "Failed to initialize tiktoken o200k_base encoder. Falling back to byte-length estimates."
            );
        }

        Self { encoder }
    }

    /// Estimate the token cost of `text`, including the safety margin.
    #[must_use]
    pub fn estimate(&self, text: &str) -> u32 {
        let raw = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len() / 3 + 5,
        };
        with_margin(raw)
    }

    /// Force the byte-length fallback path. Test hook.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn without_encoder() -> Self {
        Self { encoder: None }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}
