//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Backend call failed after exhausting retries
    #[error("Backend unavailable after {attempts} attempts: {last_error}")]
    BackendUnavailable { attempts: u32, last_error: String },

    /// Tool-call recursion guard tripped
    #[error("Maximum tool call depth ({0}) exceeded")]
    DepthExceeded(u32),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool with this name is already registered
    #[error("Duplicate tool name: {0}")]
    DuplicateToolName(String),

    /// Local handler or remote call returned an error
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    /// Model output could not be coerced into the structured schema
    #[error("Structured output parse failed: {0}")]
    StructuredParseFailed(String),

    /// Tool-call arguments could not be decoded into a string-keyed map
    #[error("Could not decode arguments for tool '{tool}': {message}")]
    ArgumentDecodeFailed { tool: String, message: String },

    /// Caller cancelled the run
    #[error("Run cancelled")]
    Cancelled,

    /// Tool result appended without a matching tool call
    #[error("Tool result references unknown tool call id: {0}")]
    OrphanToolResult(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Backend rejected the request itself (4xx); resending cannot help
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Backend answered with a body that is not a usable completion
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Remote tool transport error (listing, connection)
    #[error("Remote transport error: {0}")]
    RemoteTransport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if a backend error is worth another attempt
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::ProviderUnavailable(_)
                | Self::RateLimited(_)
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }

    /// Errors that stop the loop because the tool chain ran away rather than failed
    #[must_use]
    pub const fn is_depth_exceeded(&self) -> bool {
        matches!(self, Self::DepthExceeded(_))
    }

    pub(crate) fn tool_failed(tool: impl Into<String>, message: impl ToString) -> Self {
        Self::ToolExecutionFailed {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Convert to a user-friendly message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::BackendUnavailable { .. } | Self::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::Provider(msg) | Self::InvalidRequest(msg) | Self::InvalidResponse(msg) => {
                format!("The AI service encountered an error: {msg}")
            }
            Self::DepthExceeded(_) => {
                "The request needed too many tool calls. Please try a simpler query.".into()
            }
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolExecutionFailed { tool, message } => {
                format!("Tool '{tool}' failed: {message}")
            }
            Self::ArgumentDecodeFailed { tool, .. } => {
                format!("The model sent invalid arguments for '{tool}'.")
            }
            Self::Cancelled => "The request was cancelled.".into(),
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::Provider("503".into()).is_retryable());
        assert!(AgentError::Timeout("read".into()).is_retryable());
        assert!(!AgentError::Auth("bad key".into()).is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
        assert!(!AgentError::ToolNotFound("x".into()).is_retryable());
        assert!(!AgentError::InvalidRequest("400 Bad Request".into()).is_retryable());
        assert!(!AgentError::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn test_depth_exceeded_is_distinct() {
        let err = AgentError::DepthExceeded(5);
        assert!(err.is_depth_exceeded());
        assert_eq!(err.to_string(), "Maximum tool call depth (5) exceeded");
        assert!(!AgentError::tool_failed("a", "boom").is_depth_exceeded());
    }
}
