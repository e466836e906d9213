//! # agent-core
//!
//! Tool-calling agent orchestration with a backend-agnostic LLM abstraction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │  Reasoning  │  │    Tool      │  │   LlmBackend        │  │
//! │  │    Loop     │──│   Registry   │──│   (Strategy)        │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │         │          local │ remote                            │
//! │  ┌─────────────┐  ┌──────────────┐                           │
//! │  │   Session   │  │ RemoteTool   │                           │
//! │  │  (history)  │  │  Transport   │                           │
//! │  └─────────────┘  └──────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop sends the conversation to the backend, executes whatever tools
//! the model asks for, appends the results and repeats until the model
//! answers in plain text or the round limit is hit. An optional structured
//! response schema shapes the final answer.

pub mod assembler;
pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod remote;
pub mod schema;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use config::{AgentConfig, ToolErrorPolicy, UnknownToolPolicy};
pub use error::{AgentError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::{Completion, CompletionRequest, GenerationOptions, LlmBackend, ResponseFormat};
pub use reasoning::{Agent, AgentBuilder, Response};
pub use remote::{RemotePayload, RemoteTool, RemoteToolSpec, RemoteToolTransport};
pub use schema::{Schema, StructuredOutputSchema};
pub use session::{Session, SystemPrompt};
pub use tool::{LocalTool, Tool, ToolCall, ToolDeclaration, ToolOrigin, ToolRegistry, ToolResult};

// Cancellation handle accepted by the `*_with_cancel` entry points
pub use tokio_util::sync::CancellationToken;
