//! Sliding-window compaction: replace a contiguous window of older events
//! with a single LLM-written summary event.

use crate::context::scope::RequestScope;
use crate::llm::summarizer::Summarizer;
use crate::session::event::{Content, Event, Part};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::Arc;

/// Prefix carried by every summary event's text part.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]\n";

/// Compaction window parameters.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Events per full window; the window end lands on a multiple of this.
    pub interval: usize,
    /// Events of overlap reaching back before the last full window, so the
    /// summary retains continuity with already-summarized history.
    pub overlap: usize,
    /// Windows smaller than this are not worth an LLM call.
    pub min_events_to_compact: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: 3,
            overlap: 1,
            min_events_to_compact: 3,
        }
    }
}

/// A half-open window `[start, end)` over an event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

/// Compute the compaction window for an event list of length `len`, or `None`
/// when the list has not yet crossed an interval boundary or the window is
/// below the minimum size.
pub fn compaction_window(len: usize, config: &CompactionConfig) -> Option<Window> {
    let interval = config.interval.max(1);
    let full_windows = len / interval;
    if full_windows == 0 {
        return None;
    }

    let end = full_windows * interval;
    let start = end.saturating_sub(interval + config.overlap);
    if end - start < config.min_events_to_compact {
        return None;
    }

    Some(Window { start, end })
}

/// Runs the window computation and splices summarizer output back into the
/// event list.
pub struct Compactor {
    config: CompactionConfig,
    summarizer: Arc<dyn Summarizer>,
}

impl Compactor {
    pub fn new(config: CompactionConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { config, summarizer }
    }

    pub fn interval(&self) -> usize {
        self.config.interval.max(1)
    }

    /// Compact one window if the list is due for it.
    ///
    /// Returns the replacement event list, or `None` when nothing was
    /// compacted (no window, or the summarizer produced nothing). Events
    /// outside the window are carried over untouched, so repeated calls keep
    /// folding older history as the list grows past interval boundaries.
    pub async fn run(&self, events: &[Event], scope: &RequestScope) -> Option<Vec<Event>> {
        let window = compaction_window(events.len(), &self.config)?;
        let to_compact = &events[window.start..window.end];

        let summary = self.summarizer.summarize(to_compact, scope).await?;
        let summary_text = summary.content.text();
        if summary_text.trim().is_empty() {
            return None;
        }

        let summary_event = self.summary_event(to_compact, &summary_text);
        tracing::info!(
            start = window.start,
            end = window.end,
            replaced = to_compact.len(),
            "compacted event window into summary {}",
            summary_event.id
        );

        let mut result = Vec::with_capacity(events.len() - to_compact.len() + 1);
        result.extend_from_slice(&events[..window.start]);
        result.push(summary_event);
        result.extend_from_slice(&events[window.end..]);
        Some(result)
    }

    /// Build the summary event. Authored as `"user"` so every runner replays
    /// it into the prompt; model-authored events may be skipped by some
    /// runners. Timestamped at the window's last event so chronology holds.
    fn summary_event(&self, window: &[Event], summary_text: &str) -> Event {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let last_timestamp = window.last().map(|e| e.timestamp).unwrap_or(0.0);

        Event {
            id: format!(
                "compaction_{}_{}",
                chrono::Utc::now().timestamp_millis(),
                suffix
            ),
            invocation_id: uuid::Uuid::new_v4().to_string(),
            author: "user".to_string(),
            timestamp: last_timestamp,
            content: Content::user(vec![Part::text(format!(
                "{SUMMARY_PREFIX}{summary_text}"
            ))]),
            actions: None,
        }
    }
}
