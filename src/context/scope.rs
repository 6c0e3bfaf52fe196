//! Per-request ambient scope.
//!
//! Carries the per-request knobs (model override, context limit, retry
//! tightening) as an explicit value threaded through the session-store read
//! path and the summarizer. This is request-local by construction: two
//! concurrent requests each own their scope, so neither can clobber the
//! other's configuration mid-flight.

use serde::{Deserialize, Serialize};

/// Default retry trim percentage applied when a token-limit error triggers the
/// single shrink-and-retry pass.
pub const DEFAULT_RETRY_TRIM_PERCENT: f64 = 12.5;

/// Per-request model/endpoint override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOverride {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Ambient configuration for one gateway request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestScope {
    pub model_override: Option<ModelOverride>,
    /// Per-request context budget override; ignored unless > 0.
    pub context_limit: Option<u32>,
    /// Percentage of the budget kept on a retry pass, in `[1, 100]`.
    pub retry_trim_percent: f64,
    /// Set only while replaying a turn after a token-limit error.
    pub retry_token_budget_factor: Option<f64>,
    pub tool_executor_url: Option<String>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self {
            model_override: None,
            context_limit: None,
            retry_trim_percent: DEFAULT_RETRY_TRIM_PERCENT,
            retry_token_budget_factor: None,
            tool_executor_url: None,
        }
    }
}

impl RequestScope {
    /// The budget multiplier for this pass: 1 normally, `retryTrimPercent/100`
    /// on the retry pass.
    pub fn retry_factor(&self) -> f64 {
        self.retry_token_budget_factor.unwrap_or(1.0)
    }

    /// Flip this scope into retry mode. Called exactly once per request, when
    /// the model reports a token-limit error.
    pub fn enter_retry(&mut self) {
        self.retry_token_budget_factor = Some(self.retry_trim_percent / 100.0);
    }
}
