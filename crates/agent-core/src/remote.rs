//! Remote Tools
//!
//! Tools discovered by listing an external tool transport (for example an
//! MCP client). Each discovered tool is wrapped in a [`RemoteTool`] so the
//! registry and the reasoning loop treat it like any local tool.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::tool::{Tool, ToolArguments, ToolDeclaration, ToolOrigin};

/// Recommended upper bound for a single remote call
pub const DEFAULT_REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool description as listed by a transport
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema of the arguments
    #[serde(default, alias = "inputSchema", alias = "input_schema")]
    pub parameters: Value,
}

/// One content item of a remote result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteContent {
    Text { text: String },
    Json { value: Value },
    Resource { uri: String, text: Option<String> },
}

/// Result payload of a remote call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub content: Vec<RemoteContent>,

    /// Remote side reported a failure
    #[serde(default)]
    pub is_error: bool,
}

impl RemotePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![RemoteContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![RemoteContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Flatten content items into the text handed back to the model
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        for item in &self.content {
            match item {
                RemoteContent::Text { text } => {
                    output.push_str(text);
                    output.push('\n');
                }
                RemoteContent::Json { value } => {
                    output.push_str(&value.to_string());
                    output.push('\n');
                }
                RemoteContent::Resource { uri, text } => {
                    if let Some(text) = text {
                        output.push_str(text);
                        output.push('\n');
                    } else {
                        let _ = writeln!(output, "[Resource: {uri}]");
                    }
                }
            }
        }

        output.trim_end().to_string()
    }
}

/// Discovery and invocation over an external tool protocol
#[async_trait]
pub trait RemoteToolTransport: Send + Sync {
    /// List tools currently offered by the remote side
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>>;

    /// Invoke a tool by name
    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<RemotePayload>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;
}

/// A tool living behind a [`RemoteToolTransport`]
pub struct RemoteTool {
    transport: Arc<dyn RemoteToolTransport>,
    declaration: ToolDeclaration,
    timeout: Duration,
}

impl RemoteTool {
    #[must_use]
    pub fn new(transport: Arc<dyn RemoteToolTransport>, spec: RemoteToolSpec) -> Self {
        let parameters = if spec.parameters.is_null() {
            serde_json::json!({ "type": "object", "properties": {} })
        } else {
            spec.parameters
        };
        Self {
            transport,
            declaration: ToolDeclaration::new(
                spec.name,
                spec.description.unwrap_or_default(),
                parameters,
            ),
            timeout: DEFAULT_REMOTE_CALL_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn declaration(&self) -> ToolDeclaration {
        self.declaration.clone()
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Remote
    }

    async fn invoke(&self, arguments: ToolArguments) -> Result<String> {
        let name = &self.declaration.name;

        let payload = tokio::time::timeout(self.timeout, self.transport.call_tool(name, arguments))
            .await
            .map_err(|_| {
                AgentError::tool_failed(name, format!("remote call timed out after {:?}", self.timeout))
            })?
            .map_err(|e| AgentError::tool_failed(name, e))?;

        if payload.is_error {
            return Err(AgentError::tool_failed(name, payload.to_text()));
        }

        Ok(payload.to_text())
    }
}

/// List a transport's tools and wrap each one as a [`RemoteTool`]
pub async fn discover(
    transport: Arc<dyn RemoteToolTransport>,
    timeout: Duration,
) -> Result<Vec<Arc<dyn Tool>>> {
    if !transport.is_connected() {
        return Err(AgentError::RemoteTransport(
            "remote tool transport is not connected".into(),
        ));
    }

    let specs = transport.list_tools().await?;
    tracing::debug!(count = specs.len(), "discovered remote tools");

    Ok(specs
        .into_iter()
        .map(|spec| {
            Arc::new(RemoteTool::new(Arc::clone(&transport), spec).with_timeout(timeout))
                as Arc<dyn Tool>
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::FakeTransport;

    #[test]
    fn test_payload_to_text() {
        let payload = RemotePayload {
            content: vec![
                RemoteContent::Text { text: "line one".into() },
                RemoteContent::Json { value: json!({"ok": true}) },
                RemoteContent::Resource { uri: "file:///a".into(), text: None },
            ],
            is_error: false,
        };
        assert_eq!(payload.to_text(), "line one\n{\"ok\":true}\n[Resource: file:///a]");
    }

    #[test]
    fn test_spec_accepts_mcp_field_names() {
        let spec: RemoteToolSpec = serde_json::from_value(json!({
            "name": "createOrder",
            "description": "Create a payment link",
            "inputSchema": {"type": "object", "required": ["amount"]}
        }))
        .unwrap();
        assert_eq!(spec.parameters["required"], json!(["amount"]));
    }

    #[tokio::test]
    async fn test_discover_and_invoke() {
        let transport = Arc::new(
            FakeTransport::new()
                .with_tool("create_order", RemotePayload::text("order #1")),
        );
        let tools = discover(transport.clone(), DEFAULT_REMOTE_CALL_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].origin(), ToolOrigin::Remote);
        assert_eq!(tools[0].invoke(ToolArguments::new()).await.unwrap(), "order #1");
        assert_eq!(transport.calls(), vec!["create_order".to_string()]);
    }

    #[tokio::test]
    async fn test_remote_error_is_hard_failure() {
        let transport = Arc::new(
            FakeTransport::new().with_tool("create_order", RemotePayload::error("amount too low")),
        );
        let tools = discover(transport, DEFAULT_REMOTE_CALL_TIMEOUT).await.unwrap();

        let err = tools[0].invoke(ToolArguments::new()).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::ToolExecutionFailed { tool, message } if tool == "create_order" && message == "amount too low"
        ));
    }

    #[tokio::test]
    async fn test_remote_timeout() {
        let transport = Arc::new(
            FakeTransport::new()
                .with_tool("slow", RemotePayload::text("late"))
                .with_delay(Duration::from_millis(200)),
        );
        let tools = discover(transport, Duration::from_millis(10)).await.unwrap();

        let err = tools[0].invoke(ToolArguments::new()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_disconnected_transport_rejected() {
        let transport = Arc::new(FakeTransport::new());
        transport.disconnect().await.unwrap();

        let err = discover(transport, DEFAULT_REMOTE_CALL_TIMEOUT).await.err().unwrap();
        assert!(matches!(err, AgentError::RemoteTransport(_)));
    }
}
