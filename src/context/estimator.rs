//! Character-based token estimation.
//!
//! The 4-chars-per-token approximation is the only token measure used for
//! budget decisions anywhere in the pipeline; the model's real tokenizer is
//! consulted only indirectly, through the token-limit errors it reports.

use crate::context::adapter::Message;
use crate::session::event::{Event, Part};

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Characters a part contributes to the estimate. Binary parts contribute
/// nothing here (the message adapter is the only reader that renders them).
pub fn part_chars(part: &Part) -> usize {
    part.as_text().map(|t| t.chars().count()).unwrap_or(0)
}

/// `ceil(total_chars / 4)` over all parts of an event.
pub fn estimate_event_tokens(event: &Event) -> u32 {
    let chars: usize = event.content.parts.iter().map(part_chars).sum();
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}

/// Estimated tokens over a whole event list.
pub fn estimate_events_tokens(events: &[Event]) -> u32 {
    events.iter().map(estimate_event_tokens).sum()
}

/// Estimated tokens for a projected message.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let chars: usize = message
        .content
        .iter()
        .map(|p| p.value.chars().count())
        .sum();
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}
