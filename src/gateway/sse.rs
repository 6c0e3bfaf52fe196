//! SSE frame shapes and prefix-delta tracking.
//!
//! Every frame is exactly one of `{content}`, `{thinking}`, or `{error}`,
//! serialized as a bare `data: <json>` event, with no `id:` or `event:` fields.

use serde::Serialize;

/// `{ content: { parts: [{text}] } }`
#[derive(Debug, Clone, Serialize)]
pub struct ContentFrame {
    pub content: FrameContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameContent {
    pub parts: Vec<FramePart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FramePart {
    pub text: String,
}

impl ContentFrame {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            content: FrameContent {
                parts: vec![FramePart { text: text.into() }],
            },
        }
    }
}

/// `{ thinking: { text, id, metadata? } }`
#[derive(Debug, Clone, Serialize)]
pub struct ThinkingFrame {
    pub thinking: ThinkingDelta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingDelta {
    pub text: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ThinkingMetadata>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingMetadata {
    pub vscode_reasoning_done: bool,
}

impl ThinkingFrame {
    pub fn delta(text: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            thinking: ThinkingDelta {
                text: text.into(),
                id: id.into(),
                metadata: None,
            },
        }
    }

    /// Zero-length close frame marking the end of a reasoning segment.
    pub fn done(id: impl Into<String>) -> Self {
        Self {
            thinking: ThinkingDelta {
                text: String::new(),
                id: id.into(),
                metadata: Some(ThinkingMetadata {
                    vscode_reasoning_done: true,
                }),
            },
        }
    }
}

/// `{ error: <string> }`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Tracks what has already been sent on one channel and yields only the
/// unsent suffix.
///
/// The rule: if the new text extends the sent text, emit the suffix; if it
/// doesn't (the runner restarted its streaming turn), emit the new text in
/// full.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    sent: String,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `new_text`, returning the delta to emit (if any).
    pub fn advance(&mut self, new_text: &str) -> Option<String> {
        if new_text.is_empty() {
            return None;
        }
        let delta = match new_text.strip_prefix(self.sent.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => new_text.to_string(),
        };
        self.sent = new_text.to_string();
        if delta.is_empty() { None } else { Some(delta) }
    }

    /// Forget everything sent; used when a retry replays the turn.
    pub fn reset(&mut self) {
        self.sent.clear();
    }

    pub fn has_sent(&self) -> bool {
        !self.sent.is_empty()
    }
}
