//! # agent-runtime
//!
//! Concrete backends for the agent engine.
//!
//! ## Backends
//!
//! - **Ollama**: local inference through the OpenAI-compatible
//!   `/v1/chat/completions` endpoint, with native tool calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agent_runtime::{Agent, OllamaBackend};
//!
//! let backend = OllamaBackend::from_env()?;
//! let agent = Agent::builder()
//!     .backend(Arc::new(backend))
//!     .system_prompt("You are a weather reporter", "1.0")
//!     .build()?;
//! let response = agent.run("Should I wear a jacket in Delhi?").await?;
//! ```

pub mod ollama;

pub use ollama::{OllamaBackend, OllamaConfig};

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentBuilder, AgentConfig, AgentError, CancellationToken, LlmBackend, Message,
    Response, Result, Role, Schema, StructuredOutputSchema, Tool, ToolRegistry,
};
