//! Trimming store decorator: serves a budget-fitting view of the history.
//!
//! Stacked outside compaction. Unlike compaction this never writes back:
//! priority rankings depend on the query at hand, so a destructive trim would
//! discard context a later, differently-phrased turn still needs. The
//! authoritative history stays in the inner store.

use crate::context::estimator::estimate_events_tokens;
use crate::context::scope::RequestScope;
use crate::context::trim::{fifo_trim, priority_trim};
use crate::session::event::{Event, Session, SessionKey};
use crate::session::store::{Result, SessionStore};
use crate::strategies::PriorityRanker;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Floor under the effective budget: even the harshest retry pass keeps this
/// much room.
pub const MIN_EFFECTIVE_BUDGET: u32 = 1000;

/// Sessions with fewer events than this are served untouched.
const MIN_EVENTS_TO_TRIM: usize = 4;

/// Trimmer budget parameters.
#[derive(Debug, Clone)]
pub struct TrimConfig {
    /// Default history budget when no per-request limit is set.
    pub rank_token_budget: u32,
    /// Headroom reserved for the system prompt, tool schemas, attachments,
    /// and the incoming message.
    pub buffer_tokens: u32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            rank_token_budget: 4000,
            buffer_tokens: 2200,
        }
    }
}

/// `max(1000, (base − buffer) * retryFactor)` with the per-request override
/// taking precedence over the configured default.
pub fn effective_budget(config: &TrimConfig, scope: &RequestScope) -> u32 {
    let base = scope
        .context_limit
        .filter(|limit| *limit > 0)
        .unwrap_or(config.rank_token_budget);
    let headroom = base.saturating_sub(config.buffer_tokens);
    let scaled = (headroom as f64 * scope.retry_factor()).floor() as u32;
    scaled.max(MIN_EFFECTIVE_BUDGET)
}

pub struct TrimmingSessionStore {
    inner: Arc<dyn SessionStore>,
    ranker: Option<Arc<dyn PriorityRanker>>,
    config: TrimConfig,
}

impl TrimmingSessionStore {
    pub fn new(
        inner: Arc<dyn SessionStore>,
        ranker: Option<Arc<dyn PriorityRanker>>,
        config: TrimConfig,
    ) -> Self {
        Self {
            inner,
            ranker,
            config,
        }
    }

    fn trim(&self, events: &[Event], budget: u32) -> Vec<Event> {
        if let Some(ranker) = &self.ranker {
            let selected = priority_trim(events, budget, ranker.as_ref());
            if selected.len() < events.len() {
                return selected;
            }
            tracing::debug!("priority selection did not shrink history, falling back to FIFO");
        }
        fifo_trim(events, budget)
    }
}

#[async_trait]
impl SessionStore for TrimmingSessionStore {
    async fn create_session(
        &self,
        key: &SessionKey,
        state: HashMap<String, serde_json::Value>,
    ) -> Result<Session> {
        self.inner.create_session(key, state).await
    }

    async fn get_session(&self, key: &SessionKey, scope: &RequestScope) -> Result<Session> {
        let session = self.inner.get_session(key, scope).await?;
        if session.events.len() < MIN_EVENTS_TO_TRIM {
            return Ok(session);
        }

        let budget = effective_budget(&self.config, scope);
        let estimated = estimate_events_tokens(&session.events);
        if estimated <= budget {
            return Ok(session);
        }

        let trimmed = self.trim(&session.events, budget);
        if trimmed.len() >= session.events.len() {
            return Ok(session);
        }

        tracing::info!(
            "context budget {budget}: keeping {} of {} events (~{estimated} tokens estimated) for {key}",
            trimmed.len(),
            session.events.len(),
        );
        Ok(session.with_events(trimmed))
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>> {
        self.inner.list_sessions(app_name, user_id).await
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<()> {
        self.inner.delete_session(key).await
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<()> {
        self.inner.append_event(key, event).await
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    async fn replace_events(&self, key: &SessionKey, events: Vec<Event>) -> Result<()> {
        self.inner.replace_events(key, events).await
    }
}
