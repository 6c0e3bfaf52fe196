//! Gateway configuration, read from environment variables.
//!
//! | Variable | Effect | Default |
//! |----------|--------|---------|
//! | `ADK_PORT` | Listen port | `8000` |
//! | `ADK_PORT_FILE` | File the bound port is written to | unset |
//! | `ADK_BIND` | Bind address | `0.0.0.0` |
//! | `ADK_CONTEXT_RANK_TOKEN_BUDGET` | Trimmer base budget | `4000` |
//! | `ADK_CONTEXT_BUFFER_TOKENS` | Trimmer headroom buffer | `2200` |
//! | `ADK_COMPACTION_INTERVAL` | Compactor interval | `3` |
//! | `ADK_COMPACTION_OVERLAP` | Compactor overlap | `1` |
//! | `ADK_COMPACTION_MIN_EVENTS` | Minimum compactable window | `3` |
//! | `ADK_ENABLE_COMPACTION` | Enable the compacting decorator | `0` |
//! | `ADK_ENABLE_CONTEXT_STRATEGIES` | Enable ranking/memory/stuck hooks | `0` |
//! | `ADK_TOOL_EXECUTOR_URL` | Default tool executor passed to the runner | unset |
//! | `ADK_MEMORY_PATH` | Associative-memory JSON file | unset (ephemeral) |
//! | `OPENAI_COMPATIBLE_BASE_URL` | Summarizer/runner API root | unset |
//! | `OPENAI_COMPATIBLE_MODEL` | Summarizer/runner model | unset |
//! | `OPENAI_API_KEY` | Bearer token for the above | unset |

use std::path::PathBuf;

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: String,
    pub port_file: Option<PathBuf>,

    pub rank_token_budget: u32,
    pub buffer_tokens: u32,

    pub compaction_interval: usize,
    pub compaction_overlap: usize,
    pub compaction_min_events: usize,
    pub enable_compaction: bool,

    pub enable_context_strategies: bool,
    pub memory_path: Option<PathBuf>,

    pub tool_executor_url: Option<String>,

    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind: "0.0.0.0".to_string(),
            port_file: None,
            rank_token_budget: 4000,
            buffer_tokens: 2200,
            compaction_interval: 3,
            compaction_overlap: 1,
            compaction_min_events: 3,
            enable_compaction: false,
            enable_context_strategies: false,
            memory_path: None,
            tool_executor_url: None,
            openai_base_url: None,
            openai_model: None,
            openai_api_key: None,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an injectable lookup (testable without
    /// touching process-global state).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parse_or = |name: &str, fallback: u32| -> u32 {
            lookup(name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            port: lookup("ADK_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            bind: lookup("ADK_BIND").unwrap_or(defaults.bind),
            port_file: lookup("ADK_PORT_FILE").map(PathBuf::from),
            rank_token_budget: parse_or("ADK_CONTEXT_RANK_TOKEN_BUDGET", defaults.rank_token_budget),
            buffer_tokens: parse_or("ADK_CONTEXT_BUFFER_TOKENS", defaults.buffer_tokens),
            compaction_interval: parse_or(
                "ADK_COMPACTION_INTERVAL",
                defaults.compaction_interval as u32,
            ) as usize,
            compaction_overlap: parse_or(
                "ADK_COMPACTION_OVERLAP",
                defaults.compaction_overlap as u32,
            ) as usize,
            compaction_min_events: parse_or(
                "ADK_COMPACTION_MIN_EVENTS",
                defaults.compaction_min_events as u32,
            ) as usize,
            enable_compaction: lookup("ADK_ENABLE_COMPACTION")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.enable_compaction),
            enable_context_strategies: lookup("ADK_ENABLE_CONTEXT_STRATEGIES")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.enable_context_strategies),
            memory_path: lookup("ADK_MEMORY_PATH").map(PathBuf::from),
            tool_executor_url: lookup("ADK_TOOL_EXECUTOR_URL"),
            openai_base_url: lookup("OPENAI_COMPATIBLE_BASE_URL"),
            openai_model: lookup("OPENAI_COMPATIBLE_MODEL"),
            openai_api_key: lookup("OPENAI_API_KEY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(values: &[(&str, &str)]) -> GatewayConfig {
        let map: HashMap<String, String> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let config = from_map(&[]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.rank_token_budget, 4000);
        assert_eq!(config.buffer_tokens, 2200);
        assert_eq!(config.compaction_interval, 3);
        assert_eq!(config.compaction_overlap, 1);
        assert!(!config.enable_compaction);
        assert!(!config.enable_context_strategies);
        assert!(config.openai_base_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_map(&[
            ("ADK_PORT", "9100"),
            ("ADK_CONTEXT_RANK_TOKEN_BUDGET", "16000"),
            ("ADK_CONTEXT_BUFFER_TOKENS", "1000"),
            ("ADK_COMPACTION_INTERVAL", "5"),
            ("ADK_ENABLE_COMPACTION", "1"),
            ("ADK_ENABLE_CONTEXT_STRATEGIES", "true"),
            ("ADK_PORT_FILE", "/tmp/port"),
            ("OPENAI_COMPATIBLE_BASE_URL", "http://localhost:1234/v1"),
        ]);
        assert_eq!(config.port, 9100);
        assert_eq!(config.rank_token_budget, 16_000);
        assert_eq!(config.buffer_tokens, 1000);
        assert_eq!(config.compaction_interval, 5);
        assert!(config.enable_compaction);
        assert!(config.enable_context_strategies);
        assert_eq!(config.port_file, Some(PathBuf::from("/tmp/port")));
        assert_eq!(
            config.openai_base_url.as_deref(),
            Some("http://localhost:1234/v1")
        );
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let config = from_map(&[("ADK_PORT", "not-a-port"), ("ADK_CONTEXT_BUFFER_TOKENS", "")]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.buffer_tokens, 2200);
    }

    #[test]
    fn boolean_spellings() {
        for truthy in ["1", "true", "TRUE", "yes", "on"] {
            assert!(from_map(&[("ADK_ENABLE_COMPACTION", truthy)]).enable_compaction);
        }
        for falsy in ["0", "false", "off", "nope"] {
            assert!(!from_map(&[("ADK_ENABLE_COMPACTION", falsy)]).enable_compaction);
        }
    }
}
