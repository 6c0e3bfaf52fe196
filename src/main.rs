//! Gateway entry point.
//!
//! Reads configuration from environment variables, assembles the session
//! store stack (compaction inside, trimming outside), and serves the axum
//! gateway. See `config` for the recognized variables.

use adk_gateway::config::GatewayConfig;
use adk_gateway::context::{CompactionConfig, Compactor};
use adk_gateway::gateway::server::{AppState, start_server};
use adk_gateway::llm::OpenAiClient;
use adk_gateway::llm::summarizer::OpenAiSummarizer;
use adk_gateway::runner::{AgentRunner, ChatRunner};
use adk_gateway::session::store::{InMemorySessionStore, SessionStore};
use adk_gateway::session::{CompactingSessionStore, TrimConfig, TrimmingSessionStore};
use adk_gateway::strategies::{
    ContextStrategies, JsonFileMemory, PriorityRanker, RecencyRanker, RepetitionStuckDetector,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adk_gateway=info")),
        )
        .init();

    let config = GatewayConfig::from_env();
    tracing::info!(
        port = config.port,
        compaction = config.enable_compaction,
        strategies = config.enable_context_strategies,
        "starting adk-gateway v{}",
        adk_gateway::VERSION
    );

    let llm_client = config
        .openai_base_url
        .as_ref()
        .map(|base| OpenAiClient::new(base.clone(), config.openai_api_key.clone()));
    let model = config
        .openai_model
        .clone()
        .unwrap_or_else(|| "gpt-4o-mini".to_string());

    let raw_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let mut store: Arc<dyn SessionStore> = raw_store.clone();

    if config.enable_compaction {
        match &llm_client {
            Some(client) => {
                let summarizer = Arc::new(OpenAiSummarizer::new(client.clone(), model.clone()));
                let compactor = Compactor::new(
                    CompactionConfig {
                        interval: config.compaction_interval,
                        overlap: config.compaction_overlap,
                        min_events_to_compact: config.compaction_min_events,
                    },
                    summarizer,
                );
                store = Arc::new(CompactingSessionStore::new(store, compactor));
            }
            None => tracing::warn!(
                "ADK_ENABLE_COMPACTION is set but no summarizer transport is configured \
                 (OPENAI_COMPATIBLE_BASE_URL); compaction disabled"
            ),
        }
    }

    let (ranker, strategies): (Option<Arc<dyn PriorityRanker>>, Option<Arc<ContextStrategies>>) =
        if config.enable_context_strategies {
            let ranker: Arc<dyn PriorityRanker> = Arc::new(RecencyRanker::default());
            (
                Some(ranker.clone()),
                Some(Arc::new(ContextStrategies {
                    memory: Arc::new(JsonFileMemory::open(config.memory_path.clone())),
                    stuck: Arc::new(RepetitionStuckDetector::default()),
                    ranker,
                })),
            )
        } else {
            (None, None)
        };

    store = Arc::new(TrimmingSessionStore::new(
        store,
        ranker,
        TrimConfig {
            rank_token_budget: config.rank_token_budget,
            buffer_tokens: config.buffer_tokens,
        },
    ));

    let runner: Option<Arc<dyn AgentRunner>> = llm_client
        .map(|client| Arc::new(ChatRunner::new(client, model)) as Arc<dyn AgentRunner>);
    if runner.is_none() {
        tracing::warn!(
            "no runner transport configured (OPENAI_COMPATIBLE_BASE_URL); \
             /run_sse will answer 500 until one is set"
        );
    }

    let state = AppState {
        raw_store,
        store,
        runner,
        strategies,
        config: Arc::new(config),
        http: reqwest::Client::new(),
    };

    start_server(state).await
}
