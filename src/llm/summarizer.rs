//! LLM summarization of event windows.
//!
//! The summarizer is the compactor's only collaborator with side effects, and
//! its failure mode is deliberately boring: any transport error, non-2xx
//! status, or empty completion yields `None`, and compaction becomes a no-op
//! for that pass. The token budget remains the next line of defense.

use crate::context::scope::RequestScope;
use crate::llm::{ChatMessage, ChatRequest, OpenAiClient};
use crate::session::event::{Content, Event, Part};
use async_trait::async_trait;

/// A produced window summary.
#[derive(Debug, Clone)]
pub struct Summary {
    pub content: Content,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
}

/// Summarization contract consumed by the compactor.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a window of events, or `None` when no usable summary could
    /// be produced. Never propagates an error upward.
    async fn summarize(&self, events: &[Event], scope: &RequestScope) -> Option<Summary>;
}

const SUMMARY_TEMPLATE: &str = "The following is a conversation history between a user and an \
assistant. Write a concise summary of it, preserving concrete facts, decisions made, names and \
identifiers mentioned, and any still-open questions. Reply with the summary only.\n\n\
{conversation_history}";

/// Summarizer backed by an OpenAI-style chat completion.
pub struct OpenAiSummarizer {
    client: OpenAiClient,
    model: String,
}

impl OpenAiSummarizer {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Render events as `<author>: <text>` lines; empty-text events are
    /// skipped.
    fn conversation_history(events: &[Event]) -> String {
        events
            .iter()
            .filter_map(|event| {
                let text = event.content.text();
                if text.trim().is_empty() {
                    None
                } else {
                    Some(format!("{}: {}", event.author, text))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, events: &[Event], scope: &RequestScope) -> Option<Summary> {
        let (first, last) = match (events.first(), events.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return None,
        };

        let history = Self::conversation_history(events);
        if history.is_empty() {
            return None;
        }

        let prompt = SUMMARY_TEMPLATE.replace("{conversation_history}", &history);

        let (model, base_override) = match &scope.model_override {
            Some(o) => (o.model.as_str(), o.base_url.as_deref()),
            None => (self.model.as_str(), None),
        };

        let request = ChatRequest::new(model, vec![ChatMessage::user(prompt)]);
        let summary = match self.client.complete(&request, base_override).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("summarization failed, skipping compaction pass: {e}");
                return None;
            }
        };

        if summary.trim().is_empty() {
            tracing::warn!("summarizer returned empty content, skipping compaction pass");
            return None;
        }

        Some(Summary {
            content: Content::model(vec![Part::text(summary)]),
            start_timestamp: first.timestamp,
            end_timestamp: last.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(author: &str, text: &str, ts: f64) -> Event {
        Event {
            id: format!("e-{ts}"),
            invocation_id: "inv".to_string(),
            author: author.to_string(),
            timestamp: ts,
            content: Content {
                role: "user".to_string(),
                parts: vec![Part::text(text)],
            },
            actions: None,
        }
    }

    #[test]
    fn history_lines_are_author_prefixed() {
        let events = vec![
            event("user", "hello", 1.0),
            event("assistant", "hi there", 2.0),
            event("assistant", "   ", 3.0),
        ];
        let history = OpenAiSummarizer::conversation_history(&events);
        assert_eq!(history, "user: hello\nassistant: hi there");
    }

    #[tokio::test]
    async fn summarize_stamps_window_endpoints() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"they said hello"}}]}"#)
            .create_async()
            .await;

        let summarizer = OpenAiSummarizer::new(
            OpenAiClient::new(format!("{}/v1", server.url()), None),
            "test-model",
        );
        let events = vec![event("user", "hello", 10.0), event("assistant", "hi", 20.0)];
        let summary = summarizer
            .summarize(&events, &RequestScope::default())
            .await
            .expect("summary");

        assert_eq!(summary.start_timestamp, 10.0);
        assert_eq!(summary.end_timestamp, 20.0);
        assert_eq!(summary.content.text(), "they said hello");
    }

    #[tokio::test]
    async fn transport_failure_yields_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(502)
            .with_body(r#"{"error":{"message":"bad gateway"}}"#)
            .create_async()
            .await;

        let summarizer = OpenAiSummarizer::new(
            OpenAiClient::new(format!("{}/v1", server.url()), None),
            "test-model",
        );
        let events = vec![event("user", "hello", 1.0)];
        assert!(summarizer.summarize(&events, &RequestScope::default()).await.is_none());
    }

    #[tokio::test]
    async fn empty_completion_yields_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"  "}}]}"#)
            .create_async()
            .await;

        let summarizer = OpenAiSummarizer::new(
            OpenAiClient::new(format!("{}/v1", server.url()), None),
            "test-model",
        );
        let events = vec![event("user", "hello", 1.0)];
        assert!(summarizer.summarize(&events, &RequestScope::default()).await.is_none());
    }

    #[tokio::test]
    async fn empty_window_yields_none_without_a_request() {
        // No mockito server at all; a request would error loudly.
        let summarizer = OpenAiSummarizer::new(
            OpenAiClient::new("http://127.0.0.1:1/v1", None),
            "test-model",
        );
        assert!(summarizer.summarize(&[], &RequestScope::default()).await.is_none());
    }
}
