//! Session store contract and the in-memory baseline.
//!
//! The store exclusively owns its event lists. Decorators layered on top read
//! copies and hand back replacement lists only through [`SessionStore::replace_events`],
//! a narrow capability a store may decline by reporting `writable() == false`,
//! in which case decorators degrade to pure per-request views.

use crate::context::scope::RequestScope;
use crate::session::event::{Event, Session, SessionKey};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(SessionKey),
    #[error("session already exists: {0}")]
    AlreadyExists(SessionKey),
    #[error("store does not support in-place event replacement")]
    ReadOnly,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// CRUD plus event append over `(appName, userId, sessionId) → session`.
///
/// `get_session` takes the per-request [`RequestScope`] so decorators can
/// thread request-local budget and model overrides through the read path;
/// the baseline ignores it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        key: &SessionKey,
        state: HashMap<String, serde_json::Value>,
    ) -> Result<Session>;

    async fn get_session(&self, key: &SessionKey, scope: &RequestScope) -> Result<Session>;

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>>;

    async fn delete_session(&self, key: &SessionKey) -> Result<()>;

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()>;

    /// Whether [`SessionStore::replace_events`] is supported.
    fn writable(&self) -> bool {
        false
    }

    /// Atomically replace a session's event list. The replacement must not
    /// reorder surviving events.
    async fn replace_events(&self, _key: &SessionKey, _events: Vec<Event>) -> Result<()> {
        Err(StoreError::ReadOnly)
    }
}

/// `app → user → session` nesting.
type SessionMap = HashMap<String, HashMap<String, HashMap<String, Session>>>;

/// In-memory baseline store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<SessionMap>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        key: &SessionKey,
        state: HashMap<String, serde_json::Value>,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let user_sessions = sessions
            .entry(key.app_name.clone())
            .or_default()
            .entry(key.user_id.clone())
            .or_default();

        if user_sessions.contains_key(&key.session_id) {
            return Err(StoreError::AlreadyExists(key.clone()));
        }

        let session = Session {
            app_name: key.app_name.clone(),
            user_id: key.user_id.clone(),
            id: key.session_id.clone(),
            state,
            events: Vec::new(),
        };
        user_sessions.insert(key.session_id.clone(), session.clone());
        tracing::debug!("created session {key}");
        Ok(session)
    }

    async fn get_session(&self, key: &SessionKey, _scope: &RequestScope) -> Result<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&key.app_name)
            .and_then(|users| users.get(&key.user_id))
            .and_then(|user_sessions| user_sessions.get(&key.session_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(app_name)
            .and_then(|users| users.get(user_id))
            .map(|user_sessions| user_sessions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions
            .get_mut(&key.app_name)
            .and_then(|users| users.get_mut(&key.user_id))
            .and_then(|user_sessions| user_sessions.remove(&key.session_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&key.app_name)
            .and_then(|users| users.get_mut(&key.user_id))
            .and_then(|user_sessions| user_sessions.get_mut(&key.session_id))
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        // Keep the list in non-decreasing timestamp order; a stale timestamp
        // slots in after its peers rather than at the tail.
        let pos = session
            .events
            .iter()
            .rposition(|e| e.timestamp <= event.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        session.events.insert(pos, event);
        Ok(())
    }

    fn writable(&self) -> bool {
        true
    }

    async fn replace_events(&self, key: &SessionKey, events: Vec<Event>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&key.app_name)
            .and_then(|users| users.get_mut(&key.user_id))
            .and_then(|user_sessions| user_sessions.get_mut(&key.session_id))
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        session.events = events;
        Ok(())
    }
}
