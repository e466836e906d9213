//! Tool System
//!
//! Local and remote tools share one capability trait and one registry.
//! The reasoning loop only ever sees `Arc<dyn Tool>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::schema::{STRUCTURED_OUTPUT_TOOL, Schema, StructuredOutputSchema, to_pseudo_tool};

/// Decoded tool arguments
pub type ToolArguments = Map<String, Value>;

/// In-process handler for a local tool
pub type ToolHandler = Arc<dyn Fn(ToolArguments) -> anyhow::Result<Value> + Send + Sync>;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID used to correlate the result
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Provider-native argument encoding, normally a JSON object string
    #[serde(rename = "arguments")]
    pub arguments_raw: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments_raw: arguments.into(),
        }
    }

    /// Decode the raw arguments into a string-keyed map.
    ///
    /// Empty or `null` payloads decode to an empty map; anything that is not a
    /// JSON object fails with [`AgentError::ArgumentDecodeFailed`].
    pub fn decode_arguments(&self) -> Result<ToolArguments> {
        let raw = self.arguments_raw.trim();
        if raw.is_empty() || raw == "null" {
            return Ok(ToolArguments::new());
        }

        let decode_failed = |message: String| AgentError::ArgumentDecodeFailed {
            tool: self.name.clone(),
            message,
        };

        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(decode_failed(format!("expected a JSON object, got {other}"))),
            Err(e) => Err(decode_failed(e.to_string())),
        }
    }
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Call this result answers
    pub tool_call_id: String,

    /// Tool that was called
    pub name: String,

    /// Serialized output handed back to the model
    pub result_text: String,

    /// Set when the handler failed and the failure was reported to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            result_text: output.into(),
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            result_text: format!("Error executing tool {}: {error}", call.name),
            error: Some(error),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Tool definition as presented to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON Schema object for the arguments
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed in the schema's `required` array
    #[must_use]
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Where a tool is executed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    /// In-process handler
    Local,
    /// Forwarded over a remote tool transport
    Remote,
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declaration offered to the model
    fn declaration(&self) -> ToolDeclaration;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Local
    }

    /// Execute the tool and return the text handed back to the model
    async fn invoke(&self, arguments: ToolArguments) -> Result<String>;

    /// Validate arguments before execution
    fn validate(&self, arguments: &ToolArguments) -> Result<()> {
        let declaration = self.declaration();
        for param in declaration.required_parameters() {
            if !arguments.contains_key(param) {
                return Err(AgentError::ArgumentDecodeFailed {
                    tool: declaration.name.clone(),
                    message: format!("missing required parameter: {param}"),
                });
            }
        }
        Ok(())
    }
}

/// Tool backed by an in-process function
pub struct LocalTool {
    declaration: ToolDeclaration,
    handler: ToolHandler,
}

impl LocalTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            declaration: ToolDeclaration::new(name, description, parameters.to_json_schema()),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl Tool for LocalTool {
    fn declaration(&self) -> ToolDeclaration {
        self.declaration.clone()
    }

    async fn invoke(&self, arguments: ToolArguments) -> Result<String> {
        let value = (self.handler)(arguments)
            .map_err(|e| AgentError::tool_failed(&self.declaration.name, e))?;
        Ok(result_text(value))
    }
}

/// Serialize a handler value for the model; strings pass through unquoted
#[must_use]
pub fn result_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    structured: Option<ToolDeclaration>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            structured: None,
        }
    }

    /// Register a local tool from a handler function
    pub fn register_local<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &Schema,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ToolArguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(LocalTool::new(name, description, parameters, handler)))
    }

    /// Register any tool implementation; rejects duplicate names
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.declaration().name;
        if name == STRUCTURED_OUTPUT_TOOL || self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateToolName(name));
        }
        self.insert(name, tool);
        Ok(())
    }

    /// Bulk-add tools discovered on a remote transport.
    ///
    /// A name that is already registered keeps its existing tool; the newcomer
    /// is skipped with a warning. Returns the number of tools added.
    pub fn register_remote_batch<I>(&mut self, tools: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        let mut added = 0;
        for tool in tools {
            let name = tool.declaration().name;
            if let Some(existing) = self.tools.get(&name) {
                tracing::warn!(
                    tool = %name,
                    existing = %existing.origin(),
                    "remote tool shadowed by an already registered tool, skipping"
                );
                continue;
            }
            if name == STRUCTURED_OUTPUT_TOOL {
                tracing::warn!(tool = %name, "remote tool uses a reserved name, skipping");
                continue;
            }
            self.insert(name, tool);
            added += 1;
        }
        added
    }

    fn insert(&mut self, name: String, tool: Arc<dyn Tool>) {
        self.order.push(name.clone());
        self.tools.insert(name, tool);
    }

    /// Get a tool by name
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Install or clear the structured-output pseudo-tool
    pub fn set_structured_output(&mut self, output: Option<&StructuredOutputSchema>) {
        self.structured = output.map(to_pseudo_tool);
    }

    #[must_use]
    pub const fn has_structured_output(&self) -> bool {
        self.structured.is_some()
    }

    /// Provider-facing declarations in registration order
    #[must_use]
    pub fn declare_all(&self, include_structured_pseudo_tool: bool) -> Vec<ToolDeclaration> {
        let mut declarations: Vec<ToolDeclaration> = self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.declaration())
            .collect();

        if include_structured_pseudo_tool {
            if let Some(pseudo) = &self.structured {
                declarations.push(pseudo.clone());
            }
        }

        declarations
    }

    /// Tool names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Count of tools from one origin
    #[must_use]
    pub fn count(&self, origin: ToolOrigin) -> usize {
        self.tools.values().filter(|t| t.origin() == origin).count()
    }

    /// Number of registered tools (the pseudo-tool is not counted)
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
