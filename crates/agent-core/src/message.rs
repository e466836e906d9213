//! Conversation Messages
//!
//! Standard message format used across the agent system, plus the
//! append-only conversation log the orchestration loop writes into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result fed back to the model
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content (empty on tool-call-only turns)
    #[serde(default)]
    pub content: String,

    /// Tool that produced this message (tool turns)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Invocation this tool turn answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool invocations requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that requests tool execution
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// Add a name to the message
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this assistant turn asks for tools
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Append-only conversation history
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_system_turn(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn append_user_turn(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn append_assistant_turn(&mut self, content: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.messages
            .push(Message::assistant_with_tool_calls(content, tool_calls));
    }

    /// Append a tool result.
    ///
    /// Fails with [`AgentError::OrphanToolResult`] unless `tool_call_id` was
    /// requested by the latest assistant turn and has not been answered yet.
    pub fn append_tool_result_turn(
        &mut self,
        tool_call_id: &str,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<()> {
        self.check_tool_result(tool_call_id)?;
        self.messages.push(Message::tool(tool_call_id, name, content));
        Ok(())
    }

    /// Append an arbitrary message, enforcing the tool-result invariant
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.role == Role::Tool {
            let id = message
                .tool_call_id
                .as_deref()
                .ok_or_else(|| AgentError::OrphanToolResult(String::new()))?;
            self.check_tool_result(id)?;
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append a batch atomically: if any message is rejected, none are kept
    pub fn append_all(&mut self, messages: Vec<Message>) -> Result<()> {
        let mark = self.messages.len();
        for message in messages {
            if let Err(e) = self.append(message) {
                self.messages.truncate(mark);
                return Err(e);
            }
        }
        Ok(())
    }

    fn check_tool_result(&self, tool_call_id: &str) -> Result<()> {
        let orphan = || AgentError::OrphanToolResult(tool_call_id.to_string());

        let assistant_idx = self
            .messages
            .iter()
            .rposition(|m| m.role != Role::Tool)
            .ok_or_else(orphan)?;
        let assistant = &self.messages[assistant_idx];

        if assistant.role != Role::Assistant
            || !assistant.tool_calls.iter().any(|c| c.id == tool_call_id)
        {
            return Err(orphan());
        }

        let already_answered = self.messages[assistant_idx + 1..]
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some(tool_call_id));
        if already_answered {
            return Err(orphan());
        }

        Ok(())
    }

    /// Get all messages
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Immutable copy for request assembly
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Get the last message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop the whole history
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, "{}")
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_conversation() {
        let mut conv = Conversation::new();
        conv.append_system_turn("You are helpful.");
        conv.append_user_turn("Hi");
        conv.append_assistant_turn("Hello!", Vec::new());

        assert_eq!(conv.len(), 3);
        assert!(conv.last().unwrap().role == Role::Assistant);
    }

    #[test]
    fn test_tool_result_must_follow_its_call() {
        let mut conv = Conversation::new();
        conv.append_user_turn("weather?");

        let err = conv
            .append_tool_result_turn("call_1", "get_weather", "sunny")
            .unwrap_err();
        assert!(matches!(err, AgentError::OrphanToolResult(id) if id == "call_1"));

        conv.append_assistant_turn("", vec![call("call_1", "get_weather"), call("call_2", "get_time")]);
        conv.append_tool_result_turn("call_1", "get_weather", "sunny").unwrap();
        conv.append_tool_result_turn("call_2", "get_time", "noon").unwrap();

        // answered twice
        assert!(conv.append_tool_result_turn("call_1", "get_weather", "rain").is_err());
        // unknown id
        assert!(conv.append_tool_result_turn("call_9", "get_weather", "rain").is_err());
    }

    #[test]
    fn test_tool_result_after_new_user_turn_is_orphaned() {
        let mut conv = Conversation::new();
        conv.append_assistant_turn("", vec![call("call_1", "lookup")]);
        conv.append_user_turn("never mind");

        assert!(conv.append_tool_result_turn("call_1", "lookup", "x").is_err());
        assert!(conv.append(Message::tool("call_1", "lookup", "x")).is_err());
    }

    #[test]
    fn test_append_all_is_all_or_nothing() {
        let mut conv = Conversation::new();
        conv.append_user_turn("earlier");

        let batch = vec![
            Message::user("first"),
            Message::assistant_with_tool_calls("", vec![call("c1", "lookup")]),
            Message::tool("ghost", "lookup", "data"),
        ];
        let err = conv.append_all(batch).unwrap_err();
        assert!(matches!(err, AgentError::OrphanToolResult(id) if id == "ghost"));
        assert_eq!(conv.len(), 1);

        let batch = vec![
            Message::assistant_with_tool_calls("", vec![call("c1", "lookup")]),
            Message::tool("c1", "lookup", "data"),
        ];
        conv.append_all(batch).unwrap();
        assert_eq!(conv.len(), 3);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut conv = Conversation::new();
        conv.append_user_turn("one");
        let snap = conv.snapshot();
        conv.append_user_turn("two");

        assert_eq!(snap.len(), 1);
        assert_eq!(conv.len(), 2);
    }

    #[test]
    fn test_tool_message_serialization() {
        let msg = Message::tool("call_1", "get_weather", "{\"t\":27}");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
        assert_eq!(value["name"], "get_weather");
        assert!(value.get("tool_calls").is_none());
    }
}
