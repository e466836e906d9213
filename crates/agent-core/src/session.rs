//! Conversation State
//!
//! Everything one agent remembers between calls: versioned system prompts,
//! the append-only history and the loop bookkeeping. Lives only in process
//! memory and is guarded by the owning agent's lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::message::{Conversation, Message};
use crate::tool::ToolCall;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A system prompt with its version label
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
    pub version: String,
}

/// Conversation state of one agent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// System prompts in the order they were added; the last one is sent
    prompts: Vec<SystemPrompt>,

    /// Conversation history
    conversation: Conversation,

    /// Request/dispatch rounds completed in the current top-level call
    depth: u32,

    /// A backend request is in flight
    outstanding: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            prompts: Vec::new(),
            conversation: Conversation::new(),
            depth: 0,
            outstanding: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create with specific ID
    #[must_use]
    pub fn with_id(id: SessionId) -> Self {
        let mut session = Self::new();
        session.id = id;
        session
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn add_system_prompt(&mut self, content: impl Into<String>, version: impl Into<String>) {
        self.prompts.push(SystemPrompt {
            content: content.into(),
            version: version.into(),
        });
        self.touch();
    }

    /// Most recently added system prompt
    #[must_use]
    pub fn latest_system_prompt(&self) -> Option<&SystemPrompt> {
        self.prompts.last()
    }

    #[must_use]
    pub fn system_prompts(&self) -> &[SystemPrompt] {
        &self.prompts
    }

    pub fn append_system_turn(&mut self, content: impl Into<String>) {
        self.conversation.append_system_turn(content);
        self.touch();
    }

    pub fn append_user_turn(&mut self, content: impl Into<String>) {
        self.conversation.append_user_turn(content);
        self.touch();
    }

    pub fn append_assistant_turn(&mut self, content: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.conversation.append_assistant_turn(content, tool_calls);
        self.touch();
    }

    pub fn append_tool_result_turn(
        &mut self,
        tool_call_id: &str,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<()> {
        self.conversation
            .append_tool_result_turn(tool_call_id, name, content)?;
        self.touch();
        Ok(())
    }

    /// Append caller-built messages
    pub fn append(&mut self, message: Message) -> Result<()> {
        self.conversation.append(message)?;
        self.touch();
        Ok(())
    }

    /// Append caller-built messages as one unit; nothing is kept on failure
    pub fn append_all(&mut self, messages: Vec<Message>) -> Result<()> {
        self.conversation.append_all(messages)?;
        self.touch();
        Ok(())
    }

    /// Immutable copy of the history
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.conversation.snapshot()
    }

    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Explicit history reset; prompts are kept
    pub fn reset_history(&mut self) {
        self.conversation.clear();
        self.depth = 0;
        self.touch();
    }

    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Called once per top-level call
    pub fn reset_depth(&mut self) {
        self.depth = 0;
    }

    /// Record a finished round and return the new depth
    pub fn increment_depth(&mut self) -> u32 {
        self.depth += 1;
        self.depth
    }

    #[must_use]
    pub const fn has_outstanding_request(&self) -> bool {
        self.outstanding
    }

    pub fn set_outstanding(&mut self, outstanding: bool) {
        self.outstanding = outstanding;
    }

    /// Message count
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = Session::new();
        assert_eq!(session.message_count(), 0);
        assert_eq!(session.depth(), 0);
        assert!(session.latest_system_prompt().is_none());
    }

    #[test]
    fn test_latest_system_prompt_wins() {
        let mut session = Session::new();
        session.add_system_prompt("You are a weather reporter", "1.0");
        session.add_system_prompt("You are a terse weather reporter", "1.1");

        let latest = session.latest_system_prompt().unwrap();
        assert_eq!(latest.version, "1.1");
        assert_eq!(session.system_prompts().len(), 2);
    }

    #[test]
    fn test_depth_bookkeeping() {
        let mut session = Session::new();
        assert_eq!(session.increment_depth(), 1);
        assert_eq!(session.increment_depth(), 2);
        session.reset_depth();
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn test_reset_history_keeps_prompts() {
        let mut session = Session::new();
        session.add_system_prompt("prompt", "v1");
        session.append_user_turn("hello");
        session.reset_history();

        assert_eq!(session.message_count(), 0);
        assert_eq!(session.system_prompts().len(), 1);
    }
}
