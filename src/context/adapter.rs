//! Lossy projection of session events onto the uniform role-tagged message
//! shape consumed by the priority ranker and stuck detector.
//!
//! Every projected message originates from exactly one event; the returned
//! index table is what lets a selected-message set be lifted back to the exact
//! originating events.

use crate::session::event::{Event, Part};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Role of a projected message. Serialized as its numeric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System = 0,
    User = 1,
    Assistant = 2,
}

impl Serialize for MessageRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for MessageRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(MessageRole::System),
            1 => Ok(MessageRole::User),
            2 => Ok(MessageRole::Assistant),
            other => Err(de::Error::custom(format!("unknown message role {other}"))),
        }
    }
}

/// One `{type, value}` content entry of a projected message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub value: String,
}

/// A projected message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<MessagePart>,
}

impl Message {
    /// Concatenated text of all content entries.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|p| p.value.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Placeholder rendered for binary parts in this projection.
const BINARY_MARKER: &str = "[binary]";

fn project_part(part: &Part) -> MessagePart {
    match part.as_text() {
        Some(text) => MessagePart {
            part_type: "text".to_string(),
            value: text.into_owned(),
        },
        None => MessagePart {
            part_type: "binary".to_string(),
            value: BINARY_MARKER.to_string(),
        },
    }
}

/// Project events to messages.
///
/// Events whose concatenated text is all-whitespace are dropped. The second
/// return value maps each message back to the index of its originating event:
/// `indices[k]` is the position in `events` of the event behind `messages[k]`.
/// The `System` role is never produced here; system prompts enter the model
/// through the runner, not the event log.
pub fn events_to_messages(events: &[Event]) -> (Vec<Message>, Vec<usize>) {
    let mut messages = Vec::new();
    let mut indices = Vec::new();

    for (i, event) in events.iter().enumerate() {
        let content: Vec<MessagePart> = event.content.parts.iter().map(project_part).collect();
        let has_text = content.iter().any(|p| !p.value.trim().is_empty());
        if !has_text {
            continue;
        }

        let role = if event.is_user_authored() {
            MessageRole::User
        } else {
            MessageRole::Assistant
        };

        messages.push(Message { role, content });
        indices.push(i);
    }

    (messages, indices)
}
