//! Budgeted event selection: priority-ranked trimming with a FIFO fallback.
//!
//! Both trimmers return chronological subsequences of their input; a model
//! turn is never reordered, because reordering breaks tool-call causality.

use crate::context::adapter::events_to_messages;
use crate::context::estimator::{estimate_event_tokens, estimate_message_tokens};
use crate::session::event::Event;
use crate::strategies::PriorityRanker;

/// Below this many projected messages the history is too short to
/// meaningfully trim.
const MIN_MESSAGES_TO_TRIM: usize = 3;

/// Keep the newest events whose cumulative estimate fits `budget`.
///
/// Always returns a contiguous suffix of `events`, and never an empty one:
/// when even the newest event alone exceeds the budget, that single event is
/// kept anyway; serving a turn with no history at all is worse than
/// overshooting the estimate.
pub fn fifo_trim(events: &[Event], budget: u32) -> Vec<Event> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut used = 0u32;
    let mut start = events.len();
    for (i, event) in events.iter().enumerate().rev() {
        let tokens = estimate_event_tokens(event);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        start = i;
    }

    if start == events.len() {
        start = events.len() - 1;
    }
    events[start..].to_vec()
}

/// Rank-based trimming: project events to messages, let the ranker pick a
/// subset under `budget`, and lift the selection back to events in
/// chronological order.
///
/// Returns the input unchanged when there is too little to trim or when the
/// ranker selects nothing; the caller falls back to [`fifo_trim`] whenever
/// the result is not strictly smaller.
pub fn priority_trim(events: &[Event], budget: u32, ranker: &dyn PriorityRanker) -> Vec<Event> {
    let (messages, event_indices) = events_to_messages(events);
    if messages.len() <= MIN_MESSAGES_TO_TRIM {
        return events.to_vec();
    }

    let selected = ranker.select_by_token_budget(&messages, budget, &estimate_message_tokens);
    if selected.is_empty() {
        return events.to_vec();
    }

    let mut indices: Vec<usize> = selected
        .into_iter()
        .filter_map(|k| event_indices.get(k).copied())
        .collect();
    indices.sort_unstable();
    indices.dedup();

    indices.into_iter().map(|i| events[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::estimator::estimate_events_tokens;
    use crate::session::event::{Content, Part};
    use crate::strategies::RecencyRanker;
    use proptest::prelude::*;

    fn event(id: &str, author: &str, text: &str, ts: f64) -> Event {
        Event {
            id: id.to_string(),
            invocation_id: format!("inv-{id}"),
            author: author.to_string(),
            timestamp: ts,
            content: Content {
                role: if author == "user" { "user" } else { "model" }.to_string(),
                parts: vec![Part::text(text)],
            },
            actions: None,
        }
    }

    /// Ten events of ~500 estimated tokens each.
    fn heavy_events() -> Vec<Event> {
        (0..10)
            .map(|i| {
                let author = if i % 2 == 0 { "user" } else { "assistant" };
                event(&format!("e{i}"), author, &"x".repeat(2000), i as f64)
            })
            .collect()
    }

    #[test]
    fn fifo_keeps_newest_suffix_under_budget() {
        // 10 events x 500 tokens, budget 1800 -> last 3 fit (1500).
        let events = heavy_events();
        let trimmed = fifo_trim(&events, 1800);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0].id, "e7");
        assert_eq!(trimmed[2].id, "e9");
    }

    #[test]
    fn fifo_keeps_at_least_the_last_event() {
        let events = heavy_events();
        let trimmed = fifo_trim(&events, 10);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].id, "e9");
    }

    #[test]
    fn fifo_result_is_a_suffix() {
        let events = heavy_events();
        for budget in [0, 400, 900, 1800, 10_000] {
            let trimmed = fifo_trim(&events, budget);
            assert!(!trimmed.is_empty());
            let offset = events.len() - trimmed.len();
            assert_eq!(&events[offset..], trimmed.as_slice());
        }
    }

    #[test]
    fn priority_trim_returns_chronological_subsequence() {
        let events = heavy_events();
        let ranker = RecencyRanker::default();
        let trimmed = priority_trim(&events, 1800, &ranker);
        assert!(trimmed.len() < events.len());

        // Every survivor appears in the input, in the same relative order.
        let mut cursor = 0;
        for kept in &trimmed {
            let pos = events[cursor..]
                .iter()
                .position(|e| e.id == kept.id)
                .expect("kept event must come from the input, in order");
            cursor += pos + 1;
        }
    }

    #[test]
    fn short_histories_pass_through_untouched() {
        let events: Vec<Event> = (0..3)
            .map(|i| event(&format!("e{i}"), "user", "hello", i as f64))
            .collect();
        let ranker = RecencyRanker::default();
        let trimmed = priority_trim(&events, 1, &ranker);
        assert_eq!(trimmed, events);
    }

    #[test]
    fn whitespace_events_do_not_break_the_lift() {
        let mut events = heavy_events();
        events.insert(4, event("blank", "assistant", "   ", 3.5));
        let ranker = RecencyRanker::default();
        let trimmed = priority_trim(&events, 1800, &ranker);
        // The blank event is invisible to the ranker and must not be selected.
        assert!(trimmed.iter().all(|e| e.id != "blank"));
    }

    proptest! {
        /// Property: trimming is monotone in the budget: a bigger budget
        /// never yields fewer events.
        #[test]
        fn fifo_trim_monotone_in_budget(
            sizes in prop::collection::vec(1usize..200, 1..30),
            b1 in 0u32..2000,
            extra in 0u32..2000,
        ) {
            let events: Vec<Event> = sizes
                .iter()
                .enumerate()
                .map(|(i, len)| event(&format!("e{i}"), "user", &"y".repeat(*len), i as f64))
                .collect();
            let b2 = b1 + extra;
            prop_assert!(fifo_trim(&events, b1).len() <= fifo_trim(&events, b2).len());
        }

        /// Property: the FIFO result never exceeds the budget unless it is the
        /// forced singleton.
        #[test]
        fn fifo_trim_respects_budget(
            sizes in prop::collection::vec(1usize..200, 1..30),
            budget in 1u32..2000,
        ) {
            let events: Vec<Event> = sizes
                .iter()
                .enumerate()
                .map(|(i, len)| event(&format!("e{i}"), "user", &"y".repeat(*len), i as f64))
                .collect();
            let trimmed = fifo_trim(&events, budget);
            prop_assert!(
                estimate_events_tokens(&trimmed) <= budget || trimmed.len() == 1
            );
        }
    }
}
