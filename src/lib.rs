//! adk-gateway — a context-managing HTTP gateway for LLM agents.
//!
//! The gateway fronts an LLM-driven agent: it accepts user messages, replays
//! a growing per-session event history to the model, streams tokens back to
//! the client over SSE, and retries transparently when the model reports
//! context overflow. The interesting machinery is the context pipeline:
//! three cooperating strategies keep the history inside the model's window
//! while preserving conversational coherence:
//!
//! - **Compaction** (`session::compacting`): LLM summarization of older event
//!   windows, spliced back as a single summary event.
//! - **Priority trimming** (`context::trim`): rank-based per-request
//!   selection under a token budget.
//! - **FIFO fallback** (`context::trim`): newest-suffix selection when
//!   ranking is unavailable or unhelpful.
//!
//! ## Quick start
//!
//! ```bash
//! OPENAI_COMPATIBLE_BASE_URL=http://localhost:11434/v1 \
//! OPENAI_COMPATIBLE_MODEL=llama3 \
//! ADK_ENABLE_COMPACTION=1 \
//! adk-gateway
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod runner;
pub mod session;
pub mod strategies;

pub use error::GatewayError;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
