//! Agent Configuration
//!
//! Explicit configuration handed to the agent at construction time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::provider::GenerationOptions;

/// What happens when a local tool handler returns an error
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Fold the error into the tool-result text and let the model react
    #[default]
    ReportToModel,
    /// Abort the run with `ToolExecutionFailed`
    Abort,
}

/// What happens when the model names a tool nobody registered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// Abort the run with `ToolNotFound`
    #[default]
    Fail,
    /// Compatibility mode: log, answer the call with an error result, continue
    Skip,
}

/// Agent configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Request/dispatch rounds allowed per top-level call
    pub max_tool_call_depth: u32,

    /// Backend attempts per request
    pub max_retry: u32,

    /// Backoff before retry `n` is `retry_backoff_base_ms * n`
    pub retry_backoff_base_ms: u64,

    /// Upper bound for one remote tool call
    pub remote_call_timeout_secs: u64,

    pub tool_error_policy: ToolErrorPolicy,

    pub unknown_tool_policy: UnknownToolPolicy,

    /// Content used for assistant turns that only carry tool calls
    pub empty_assistant_filler: String,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_call_depth: 5,
            max_retry: 3,
            retry_backoff_base_ms: 500,
            remote_call_timeout_secs: 30,
            tool_error_policy: ToolErrorPolicy::default(),
            unknown_tool_policy: UnknownToolPolicy::default(),
            empty_assistant_filler: "I'll help you with that.".into(),
            generation: GenerationOptions::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with `AGENT_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(depth) = env_parse("AGENT_MAX_TOOL_DEPTH")? {
            config.max_tool_call_depth = depth;
        }
        if let Some(retry) = env_parse("AGENT_MAX_RETRY")? {
            config.max_retry = retry;
        }
        if let Some(backoff) = env_parse("AGENT_RETRY_BACKOFF_MS")? {
            config.retry_backoff_base_ms = backoff;
        }
        if let Some(timeout) = env_parse("AGENT_REMOTE_TIMEOUT_SECS")? {
            config.remote_call_timeout_secs = timeout;
        }
        if let Ok(model) = std::env::var("AGENT_MODEL") {
            config.generation.model = model;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tool_call_depth == 0 {
            return Err(AgentError::Config("max_tool_call_depth must be at least 1".into()));
        }
        if self.max_retry == 0 {
            return Err(AgentError::Config("max_retry must be at least 1".into()));
        }
        if self.remote_call_timeout_secs == 0 {
            return Err(AgentError::Config("remote_call_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms.saturating_mul(u64::from(attempt)))
    }

    #[must_use]
    pub const fn remote_call_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_call_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AgentError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tool_call_depth, 5);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.retry_backoff_base_ms, 500);
        assert_eq!(config.remote_call_timeout(), Duration::from_secs(30));
        assert_eq!(config.tool_error_policy, ToolErrorPolicy::ReportToModel);
        assert_eq!(config.unknown_tool_policy, UnknownToolPolicy::Fail);
        config.validate().unwrap();
    }

    #[test]
    fn test_linear_backoff() {
        let config = AgentConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let config = AgentConfig {
            max_tool_call_depth: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"max_tool_call_depth": 8, "unknown_tool_policy": "skip"}"#)
                .unwrap();
        assert_eq!(config.max_tool_call_depth, 8);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.unknown_tool_policy, UnknownToolPolicy::Skip);
    }
}
