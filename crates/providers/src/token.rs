//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Only used when
//! a provider response carries no usage block; provider-reported usage is
//! always preferred.

use parley_core::message::Message;
use parley_core::provider::Usage;

/// Per-message overhead for role name and delimiters in the wire format.
const MESSAGE_OVERHEAD: u32 = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    u32::try_from(text.len().div_ceil(4)).unwrap_or(u32::MAX)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    MESSAGE_OVERHEAD.saturating_add(estimate_tokens(&message.content))
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    messages
        .iter()
        .fold(0u32, |acc, m| acc.saturating_add(estimate_message_tokens(m)))
}

/// Build an estimated usage block for a prompt and its completion.
pub fn estimate_usage(prompt: &[Message], completion: &str) -> Usage {
    Usage::new(estimate_messages_tokens(prompt), estimate_tokens(completion))
}
