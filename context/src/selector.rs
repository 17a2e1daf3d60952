//! Greedy-from-newest history selection under a token budget.

use confab_types::ChatMessage;

use crate::TokenEstimator;

/// Per-message framing cost (role markers, separators, metadata) charged on
/// top of the content estimate.
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 15;

/// Select the maximal chronological suffix of `history` that fits within
/// `max_tokens` once the system prompt and current message are paid for.
///
/// `history` must be ordered oldest to newest. The walk runs newest to
/// oldest and stops at (but does not include) the first message that would
/// push the running total past the available budget, so the result is:
///
/// - always a contiguous suffix of `history` (no gaps),
/// - never over budget,
/// - the largest such suffix. Recent messages are the highest-value context,
///   which is why the greedy walk starts from the newest.
#[must_use]
pub fn select_context<'a>(
    estimator: &TokenEstimator,
    max_tokens: u32,
    system_prompt_tokens: u32,
    current_message_tokens: u32,
    history: &'a [ChatMessage],
) -> &'a [ChatMessage] {
    let available = i64::from(max_tokens)
        - i64::from(system_prompt_tokens)
        - i64::from(current_message_tokens);
    if available <= 0 || history.is_empty() {
        return &[];
    }

    let mut used: i64 = 0;
    let mut start = history.len();
    for (index, message) in history.iter().enumerate().rev() {
        let cost = i64::from(estimator.estimate(&message.content))
            + i64::from(MESSAGE_OVERHEAD_TOKENS);
        if used + cost > available {
            break;
        }
        used += cost;
        start = index;
    }

    tracing::debug!(
        selected = history.len() - start,
        total = history.len(),
        used_tokens = used,
        available_tokens = available,
        "selected context window"
    );

    &history[start..]
}
