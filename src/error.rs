//! Gateway error taxonomy and the token-limit error classifier.

use crate::session::store::StoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Errors surfaced at the gateway's HTTP boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session already exists: {0}")]
    SessionExists(String),
    #[error("agent not loaded: {0}")]
    AgentLoad(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("llm transport error: {0}")]
    Transport(String),
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => GatewayError::SessionNotFound(key.to_string()),
            StoreError::AlreadyExists(key) => GatewayError::SessionExists(key.to_string()),
            StoreError::ReadOnly => GatewayError::InvalidRequest(e.to_string()),
        }
    }
}

/// Phrases that mark a model error as a context-window overflow. Providers
/// word these every which way; the match is case-insensitive and the
/// wildcarded entries bridge punctuation and qualifiers (`max_tokens`,
/// `maximum input token count`, ...).
static TOKEN_LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        "(?i)",
        "context[ _]length",
        "|prompt too long",
        "|token limit",
        "|max[a-z_ -]{0,24}token",
        "|maximum context",
        "|exceeded",
        "|num_ctx",
        "|input[a-z_ -]{0,24}length",
        "|too many tokens",
        "|token count",
        "|context window",
    ))
    .expect("token-limit regex is valid")
});

/// Whether a model-reported error message describes a token/context overflow
/// recoverable by the single shrink-and-retry pass.
pub fn is_token_limit_error(message: &str) -> bool {
    TOKEN_LIMIT_PATTERN.is_match(message)
}
