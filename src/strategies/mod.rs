//! External context-strategy contracts: priority ranking, associative memory,
//! and stuck detection.
//!
//! The pipeline only depends on the traits here. The bundled implementations
//! (`RecencyRanker`, `JsonFileMemory`, `RepetitionStuckDetector`) are small
//! defaults so the gateway works without an external memory deployment; swap
//! them out by providing your own trait objects.

use crate::context::adapter::{Message, MessageRole};
use crate::session::event::Part;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Strategy-layer error. Always absorbed by the pipeline; a strategy failure
/// never breaks a turn.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StrategyError>;

// ─── Priority ranking ────────────────────────────────────────

/// A scored message reference produced by [`PriorityRanker::sort_by_priority`].
#[derive(Debug, Clone, Serialize)]
pub struct RankedMessage {
    /// Index into the input slice.
    pub index: usize,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Message scoring and budgeted selection.
///
/// Selection operations return index sets into the input slice, ascending,
/// i.e. a subset of the input preserving relative order. Index identity is
/// what lets the priority trimmer lift a selection back to the exact
/// originating events.
pub trait PriorityRanker: Send + Sync {
    /// Score all messages, highest first.
    fn sort_by_priority(&self, messages: &[Message]) -> Vec<RankedMessage>;

    /// Select a subset whose cumulative `token_fn` estimate fits `budget`.
    fn select_by_token_budget(
        &self,
        messages: &[Message],
        budget: u32,
        token_fn: &dyn Fn(&Message) -> u32,
    ) -> Vec<usize>;

    /// Select the `n` highest-priority messages.
    fn select_top_messages(&self, messages: &[Message], n: usize) -> Vec<usize>;
}

/// Default ranker: favors recent messages, with a bonus for user turns so the
/// questions driving the conversation outrank boilerplate replies.
#[derive(Debug, Clone)]
pub struct RecencyRanker {
    pub user_bonus: f64,
}

impl Default for RecencyRanker {
    fn default() -> Self {
        Self { user_bonus: 0.25 }
    }
}

impl PriorityRanker for RecencyRanker {
    fn sort_by_priority(&self, messages: &[Message]) -> Vec<RankedMessage> {
        let len = messages.len().max(1);
        let mut ranked: Vec<RankedMessage> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let recency = (i + 1) as f64 / len as f64;
                let mut score = recency;
                let mut reasons = vec![format!("recency {recency:.2}")];
                if m.role == MessageRole::User {
                    score += self.user_bonus;
                    reasons.push("user turn".to_string());
                }
                RankedMessage {
                    index: i,
                    score,
                    reasons,
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    fn select_by_token_budget(
        &self,
        messages: &[Message],
        budget: u32,
        token_fn: &dyn Fn(&Message) -> u32,
    ) -> Vec<usize> {
        let mut used = 0u32;
        let mut selected = Vec::new();
        for ranked in self.sort_by_priority(messages) {
            let tokens = token_fn(&messages[ranked.index]);
            if used + tokens <= budget {
                used += tokens;
                selected.push(ranked.index);
            }
        }
        selected.sort_unstable();
        selected
    }

    fn select_top_messages(&self, messages: &[Message], n: usize) -> Vec<usize> {
        let mut selected: Vec<usize> = self
            .sort_by_priority(messages)
            .into_iter()
            .take(n)
            .map(|r| r.index)
            .collect();
        selected.sort_unstable();
        selected
    }
}

// ─── Associative memory ──────────────────────────────────────

/// One stored memory node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNode {
    pub id: String,
    pub content: String,
    pub category: String,
    pub subcategory: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

/// Result of a budgeted memory retrieval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SieveResult {
    pub context: String,
    pub nodes_included: u32,
    pub token_estimate: u32,
}

/// Terminal outcome of one served turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Failure,
    Partial,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Failure => "failure",
            TaskOutcome::Partial => "partial",
        }
    }
}

/// Opaque associative-memory service.
#[async_trait]
pub trait AssociativeMemory: Send + Sync {
    /// Retrieve the most relevant stored context for `query`, at most
    /// `token_budget` estimated tokens of it.
    async fn sieve(&self, query: &str, token_budget: u32) -> Result<SieveResult>;

    /// Store a new node.
    async fn ingest(
        &self,
        content: &str,
        category: &str,
        subcategory: &str,
        source: &str,
        tags: &[String],
    ) -> Result<MemoryNode>;

    /// Record how a turn ended.
    async fn record_task_outcome(&self, outcome: TaskOutcome) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    nodes: Vec<MemoryNode>,
    #[serde(default)]
    outcomes: HashMap<String, u64>,
}

/// Associative memory persisting to a single JSON file.
///
/// Retrieval is term-overlap scoring, deliberately naive. Without a path the
/// store is ephemeral (process lifetime only).
pub struct JsonFileMemory {
    path: Option<PathBuf>,
    state: RwLock<MemoryFile>,
}

impl JsonFileMemory {
    /// Open a file-backed memory, loading any existing nodes. An unreadable
    /// or corrupt file starts empty rather than failing startup.
    pub fn open(path: Option<PathBuf>) -> Self {
        let state = path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| serde_json::from_str::<MemoryFile>(&raw).ok())
            .unwrap_or_default();
        if !state.nodes.is_empty() {
            tracing::info!(nodes = state.nodes.len(), "loaded associative memory");
        }
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    fn persist(&self, state: &MemoryFile) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(state)?)?;
        }
        Ok(())
    }
}

fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

#[async_trait]
impl AssociativeMemory for JsonFileMemory {
    async fn sieve(&self, query: &str, token_budget: u32) -> Result<SieveResult> {
        let query_terms = terms(query);
        let state = self.state.read().await;

        let mut scored: Vec<(usize, &MemoryNode)> = state
            .nodes
            .iter()
            .map(|node| {
                let haystack = terms(&node.content);
                let score = query_terms
                    .iter()
                    .filter(|t| haystack.contains(t) || node.tags.iter().any(|tag| tag == *t))
                    .count();
                (score, node)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        // Best match first; ties broken by most recent ingest.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));

        let mut context_parts = Vec::new();
        let mut token_estimate = 0u32;
        for (_, node) in scored {
            let tokens = node.content.chars().count().div_ceil(4) as u32;
            if token_estimate + tokens > token_budget {
                break;
            }
            token_estimate += tokens;
            context_parts.push(node.content.clone());
        }

        Ok(SieveResult {
            nodes_included: context_parts.len() as u32,
            context: context_parts.join("\n---\n"),
            token_estimate,
        })
    }

    async fn ingest(
        &self,
        content: &str,
        category: &str,
        subcategory: &str,
        source: &str,
        tags: &[String],
    ) -> Result<MemoryNode> {
        let node = MemoryNode {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            source: source.to_string(),
            tags: tags.to_vec(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut state = self.state.write().await;
        state.nodes.push(node.clone());
        self.persist(&state)?;
        Ok(node)
    }

    async fn record_task_outcome(&self, outcome: TaskOutcome) -> Result<()> {
        let mut state = self.state.write().await;
        *state.outcomes.entry(outcome.as_str().to_string()).or_default() += 1;
        self.persist(&state)?;
        Ok(())
    }
}

// ─── Stuck detection ─────────────────────────────────────────

/// Outcome of a stuck-loop check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StuckDetection {
    pub is_stuck: bool,
    #[serde(rename = "type")]
    pub kind: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub suggested_action: String,
}

impl StuckDetection {
    pub fn not_stuck() -> Self {
        Self {
            is_stuck: false,
            kind: String::new(),
            confidence: 0.0,
            evidence: vec![],
            suggested_action: String::new(),
        }
    }
}

/// A recovery nudge to prepend to the user's turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryMessage {
    pub content: Vec<Part>,
}

/// Opaque stuck-detection service.
#[async_trait]
pub trait StuckDetector: Send + Sync {
    async fn detect_stuck(&self, messages: &[Message]) -> Result<StuckDetection>;
    async fn generate_recovery_message(&self, detection: &StuckDetection) -> Result<RecoveryMessage>;
}

/// Default detector: flags a loop when the last assistant turns are
/// near-identical after whitespace/case normalization.
#[derive(Debug, Clone)]
pub struct RepetitionStuckDetector {
    /// How many trailing assistant turns to compare.
    pub window: usize,
}

impl Default for RepetitionStuckDetector {
    fn default() -> Self {
        Self { window: 3 }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[async_trait]
impl StuckDetector for RepetitionStuckDetector {
    async fn detect_stuck(&self, messages: &[Message]) -> Result<StuckDetection> {
        let assistant_turns: Vec<String> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| normalize(&m.text()))
            .filter(|t| !t.is_empty())
            .collect();

        if assistant_turns.len() < self.window {
            return Ok(StuckDetection::not_stuck());
        }

        let tail = &assistant_turns[assistant_turns.len() - self.window..];
        let repeated = tail.iter().all(|t| t == &tail[0]);
        if !repeated {
            return Ok(StuckDetection::not_stuck());
        }

        Ok(StuckDetection {
            is_stuck: true,
            kind: "repetition".to_string(),
            confidence: 0.9,
            evidence: vec![tail[0].chars().take(200).collect()],
            suggested_action: "redirect".to_string(),
        })
    }

    async fn generate_recovery_message(&self, detection: &StuckDetection) -> Result<RecoveryMessage> {
        let kind = if detection.kind.is_empty() {
            "repetition"
        } else {
            detection.kind.as_str()
        };
        Ok(RecoveryMessage {
            content: vec![Part::text(format!(
                "Note: the conversation appears stuck in a {kind} loop. \
                 Take a different approach to the request below instead of \
                 repeating the previous answer."
            ))],
        })
    }
}

/// The strategy services consumed by the gateway hooks and `/context-tools`.
#[derive(Clone)]
pub struct ContextStrategies {
    pub memory: Arc<dyn AssociativeMemory>,
    pub stuck: Arc<dyn StuckDetector>,
    pub ranker: Arc<dyn PriorityRanker>,
}
