//! Cost estimation for context entries.
//!
//! Uses a character-based heuristic: ~4 characters per token. Binary
//! references are charged for their URI only, never for the content behind it.

use scribeloop_core::task::CostUnit;
use scribeloop_core::tool::Payload;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Budget cost of a payload in `unit`. Every entry costs at least 1.
pub fn payload_cost(payload: &Payload, unit: CostUnit) -> usize {
    let measured = match payload {
        Payload::Text { text } => text.as_str(),
        Payload::Reference { uri, .. } => uri.as_str(),
    };
    let cost = match unit {
        CostUnit::Bytes => measured.len(),
        CostUnit::Tokens => estimate_tokens(measured),
    };
    cost.max(1)
}
