//! Compacting store decorator: folds older event windows into LLM summaries.
//!
//! Stacked directly over the baseline store, underneath trimming; a
//! summarized history is cheaper, so trimming often becomes a no-op after a
//! compaction pass. Compaction failures are advisory: the wrapped session is
//! served unchanged and the token budget stays as the next line of defense.

use crate::context::compact::Compactor;
use crate::context::scope::RequestScope;
use crate::session::event::{Event, Session, SessionKey};
use crate::session::store::{Result, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub struct CompactingSessionStore {
    inner: Arc<dyn SessionStore>,
    compactor: Compactor,
}

impl CompactingSessionStore {
    pub fn new(inner: Arc<dyn SessionStore>, compactor: Compactor) -> Self {
        Self { inner, compactor }
    }

    /// Run one compaction pass and, when the inner store allows it, persist
    /// the replacement list. Returns the event list to serve.
    async fn compact_and_store(
        &self,
        key: &SessionKey,
        events: &[Event],
        scope: &RequestScope,
    ) -> Option<Vec<Event>> {
        let compacted = self.compactor.run(events, scope).await?;
        if self.inner.writable() {
            if let Err(e) = self.inner.replace_events(key, compacted.clone()).await {
                tracing::warn!("failed to write back compacted events for {key}: {e}");
            }
        }
        Some(compacted)
    }
}

#[async_trait]
impl SessionStore for CompactingSessionStore {
    async fn create_session(
        &self,
        key: &SessionKey,
        state: HashMap<String, serde_json::Value>,
    ) -> Result<Session> {
        self.inner.create_session(key, state).await
    }

    async fn get_session(&self, key: &SessionKey, scope: &RequestScope) -> Result<Session> {
        let session = self.inner.get_session(key, scope).await?;
        if session.events.is_empty() {
            return Ok(session);
        }

        match self.compact_and_store(key, &session.events, scope).await {
            Some(events) => Ok(session.with_events(events)),
            None => Ok(session),
        }
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        self.inner.list_sessions(app_name, user_id).await
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<()> {
        self.inner.delete_session(key).await
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()> {
        self.inner.append_event(key, event).await?;

        // Post-append compaction only runs against a store we can write back
        // to; with a read-only inner store the read path picks it up instead.
        if self.inner.writable() {
            let scope = RequestScope::default();
            let session = self.inner.get_session(key, &scope).await?;
            if session.events.len() >= self.compactor.interval() {
                self.compact_and_store(key, &session.events, &scope).await;
            }
        }
        Ok(())
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    async fn replace_events(&self, key: &SessionKey, events: Vec<Event>) -> Result<()> {
        self.inner.replace_events(key, events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::compact::{CompactionConfig, SUMMARY_PREFIX};
    use crate::llm::summarizer::{Summarizer, Summary};
    use crate::session::event::{Content, Part};
    use crate::session::store::{InMemorySessionStore, StoreError};

    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, events: &[Event], _scope: &RequestScope) -> Option<Summary> {
            Some(Summary {
                content: Content::model(vec![Part::text("condensed")]),
                start_timestamp: events.first().map(|e| e.timestamp).unwrap_or(0.0),
                end_timestamp: events.last().map(|e| e.timestamp).unwrap_or(0.0),
            })
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _events: &[Event], _scope: &RequestScope) -> Option<Summary> {
            None
        }
    }

    /// Read-only view over an inner store: declines `replace_events`.
    struct ReadOnly(Arc<dyn SessionStore>);

    #[async_trait]
    impl SessionStore for ReadOnly {
        async fn create_session(
            &self,
            key: &SessionKey,
            state: HashMap<String, serde_json::Value>,
        ) -> Result<Session> {
            self.0.create_session(key, state).await
        }
        async fn get_session(&self, key: &SessionKey, scope: &RequestScope) -> Result<Session> {
            self.0.get_session(key, scope).await
        }
        async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
            self.0.list_sessions(app_name, user_id).await
        }
        async fn delete_session(&self, key: &SessionKey) -> Result<()> {
            self.0.delete_session(key).await
        }
        async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()> {
            self.0.append_event(key, event).await
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("adk_chat", "u1", "s1")
    }

    fn event(id: &str, ts: f64) -> Event {
        Event {
            id: id.to_string(),
            invocation_id: format!("inv-{id}"),
            author: "user".to_string(),
            timestamp: ts,
            content: Content::user(vec![Part::text(format!("text for {id}"))]),
            actions: None,
        }
    }

    fn compactor(summarizer: Arc<dyn Summarizer>) -> Compactor {
        Compactor::new(
            CompactionConfig {
                interval: 3,
                overlap: 1,
                min_events_to_compact: 3,
            },
            summarizer,
        )
    }

    async fn seeded_store(n: usize) -> Arc<InMemorySessionStore> {
        let store = Arc::new(InMemorySessionStore::new());
        store.create_session(&key(), HashMap::new()).await.expect("create");
        for i in 1..=n {
            store
                .append_event(&key(), event(&format!("e{i}"), i as f64))
                .await
                .expect("append");
        }
        store
    }

    #[tokio::test]
    async fn read_path_compacts_and_writes_back() {
        let inner = seeded_store(7).await;
        let store = CompactingSessionStore::new(inner.clone(), compactor(Arc::new(StubSummarizer)));

        let session = store
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get");
        assert_eq!(session.events.len(), 4);
        assert!(session.events[2].content.text().starts_with(SUMMARY_PREFIX));

        // Writable inner store: the compacted list was persisted.
        let raw = inner
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get raw");
        assert_eq!(raw.events.len(), 4);
    }

    #[tokio::test]
    async fn read_only_inner_store_gets_a_view_only() {
        let inner = seeded_store(7).await;
        let read_only: Arc<dyn SessionStore> = Arc::new(ReadOnly(inner.clone()));
        let store = CompactingSessionStore::new(read_only, compactor(Arc::new(StubSummarizer)));

        let session = store
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get");
        assert_eq!(session.events.len(), 4);

        // The inner store still holds the full history.
        let raw = inner
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get raw");
        assert_eq!(raw.events.len(), 7);
    }

    #[tokio::test]
    async fn summarizer_failure_serves_session_unchanged() {
        let inner = seeded_store(7).await;
        let store = CompactingSessionStore::new(inner, compactor(Arc::new(FailingSummarizer)));

        let session = store
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get");
        assert_eq!(session.events.len(), 7);
    }

    #[tokio::test]
    async fn empty_session_passes_through() {
        let inner = seeded_store(0).await;
        let store = CompactingSessionStore::new(inner, compactor(Arc::new(StubSummarizer)));
        let session = store
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get");
        assert!(session.events.is_empty());
    }

    #[tokio::test]
    async fn append_path_compacts_once_interval_is_reached() {
        let inner = Arc::new(InMemorySessionStore::new());
        inner.create_session(&key(), HashMap::new()).await.expect("create");
        let store = CompactingSessionStore::new(inner.clone(), compactor(Arc::new(StubSummarizer)));

        for i in 1..=4 {
            store
                .append_event(&key(), event(&format!("e{i}"), i as f64))
                .await
                .expect("append");
        }

        // At the third append the window [0,3) collapsed to one summary; the
        // fourth event landed after it.
        let raw = inner
            .get_session(&key(), &RequestScope::default())
            .await
            .expect("get raw");
        assert!(raw.events.len() < 4);
        assert!(
            raw.events
                .iter()
                .any(|e| e.content.text().starts_with(SUMMARY_PREFIX))
        );
    }

    #[tokio::test]
    async fn crud_passes_through() {
        let inner = Arc::new(InMemorySessionStore::new());
        let store = CompactingSessionStore::new(inner, compactor(Arc::new(StubSummarizer)));
        store.create_session(&key(), HashMap::new()).await.expect("create");
        assert!(matches!(
            store.create_session(&key(), HashMap::new()).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(
            store.list_sessions("adk_chat", "u1").await.expect("list").len(),
            1
        );
        store.delete_session(&key()).await.expect("delete");
    }
}
