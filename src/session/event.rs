//! Session data model — events, content parts, and the session record.
//!
//! Events are append-only: a session's history only ever grows through
//! [`SessionStore::append_event`](crate::session::SessionStore::append_event),
//! and compaction replaces whole event lists atomically instead of editing
//! events in place.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// One content part of an event.
///
/// The wire shape is schema-loose (`{text?, value?, thought?, inlineData?}`);
/// internally every part is exactly one of these variants so all readers can
/// match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PartWire", into = "PartWire")]
pub enum Part {
    /// Plain model/user text.
    Text(String),
    /// Reasoning text, rendered on the thinking channel, never the content one.
    Thought(String),
    /// Arbitrary structured value; stringified on read.
    Value(serde_json::Value),
    /// Binary payload marker. The payload itself is preserved verbatim but
    /// contributes no text.
    Inline(serde_json::Value),
}

impl Part {
    /// Create a text part.
    pub fn text(s: impl Into<String>) -> Self {
        Part::Text(s.into())
    }

    /// Create a thought part.
    pub fn thought(s: impl Into<String>) -> Self {
        Part::Thought(s.into())
    }

    /// Textual rendering of this part, `None` for binary parts.
    ///
    /// String values render unquoted; other JSON values render as compact JSON.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Part::Text(t) | Part::Thought(t) => Some(Cow::Borrowed(t.as_str())),
            Part::Value(serde_json::Value::String(s)) => Some(Cow::Borrowed(s.as_str())),
            Part::Value(v) => Some(Cow::Owned(v.to_string())),
            Part::Inline(_) => None,
        }
    }

    /// True for [`Part::Thought`].
    pub fn is_thought(&self) -> bool {
        matches!(self, Part::Thought(_))
    }
}

/// Wire-format bridge for [`Part`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<serde_json::Value>,
}

impl From<PartWire> for Part {
    fn from(wire: PartWire) -> Self {
        if let Some(data) = wire.inline_data {
            return Part::Inline(data);
        }
        if wire.thought == Some(true) {
            return Part::Thought(wire.text.unwrap_or_default());
        }
        if let Some(text) = wire.text {
            return Part::Text(text);
        }
        if let Some(value) = wire.value {
            return Part::Value(value);
        }
        Part::Text(String::new())
    }
}

impl From<Part> for PartWire {
    fn from(part: Part) -> Self {
        match part {
            Part::Text(text) => PartWire {
                text: Some(text),
                ..Default::default()
            },
            Part::Thought(text) => PartWire {
                text: Some(text),
                thought: Some(true),
                ..Default::default()
            },
            Part::Value(value) => PartWire {
                value: Some(value),
                ..Default::default()
            },
            Part::Inline(data) => PartWire {
                inline_data: Some(data),
                ..Default::default()
            },
        }
    }
}

/// Event content: a role tag plus an ordered part list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// User-role content.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }

    /// Model-role content.
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: "model".to_string(),
            parts,
        }
    }

    /// Concatenated text of all non-binary parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A single append-only record in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    /// Correlates events emitted within one model turn.
    pub invocation_id: String,
    /// Producer tag; `"user"` (any case) and the empty string identify the user.
    pub author: String,
    /// Seconds since epoch.
    pub timestamp: f64,
    pub content: Content,
    /// Opaque metadata, preserved verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<serde_json::Value>,
}

impl Event {
    /// Whether this event was authored by the user (case-insensitive; an empty
    /// author also counts as the user).
    pub fn is_user_authored(&self) -> bool {
        self.author.is_empty() || self.author.eq_ignore_ascii_case("user")
    }
}

/// Identity triple for a session; immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// The event list and metadata for one `(app, user, session)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub app_name: String,
    pub user_id: String,
    pub id: String,
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.id)
    }

    /// Shallow copy with a replacement event list. The surviving metadata is
    /// shared structure; only the event list differs.
    pub fn with_events(&self, events: Vec<Event>) -> Session {
        Session {
            events,
            ..self.clone()
        }
    }
}
