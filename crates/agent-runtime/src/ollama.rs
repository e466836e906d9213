//! Ollama LLM Backend
//!
//! Implementation of `LlmBackend` against Ollama's OpenAI-compatible
//! `/v1/chat/completions` endpoint, with native tool calling and the
//! JSON-schema response format.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::Role,
    provider::{
        Completion, CompletionRequest, FinishReason, LlmBackend, ResponseFormat, TokenUsage,
    },
    tool::{ToolCall, ToolDeclaration},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Ollama backend configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Server base URL, without the `/v1` suffix
    pub base_url: String,

    /// Overrides the model named in the generation options
    pub model: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Bearer token for proxied deployments
    pub api_key: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: None,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl OllamaConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("OLLAMA_HOST")
            .map(|host| normalize_host(&host))
            .unwrap_or_else(|_| Self::default().base_url);

        Self {
            base_url,
            model: std::env::var("OLLAMA_MODEL").ok().filter(|m| !m.is_empty()),
            api_key: std::env::var("OLLAMA_API_KEY").ok().filter(|k| !k.is_empty()),
            ..Default::default()
        }
    }
}

/// `OLLAMA_HOST` may be `host:port` or a full URL
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Ollama LLM backend
pub struct OllamaBackend {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    #[must_use]
    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Convert agent messages to chat-completions format
    fn convert_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
        let system = request.system_prompt.iter().map(|prompt| ChatMessage {
            role: "system",
            content: Some(prompt.clone()),
            ..ChatMessage::default()
        });

        let history = request.messages.iter().map(|m| match m.role {
            Role::System => ChatMessage {
                role: "system",
                content: Some(m.content.clone()),
                ..ChatMessage::default()
            },
            Role::User => ChatMessage {
                role: "user",
                content: Some(m.content.clone()),
                ..ChatMessage::default()
            },
            Role::Assistant => ChatMessage {
                role: "assistant",
                content: Some(m.content.clone()),
                tool_calls: m.tool_calls.iter().map(WireToolCall::from).collect(),
                ..ChatMessage::default()
            },
            Role::Tool => ChatMessage {
                role: "tool",
                content: Some(m.content.clone()),
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
                ..ChatMessage::default()
            },
        });

        system.chain(history).collect()
    }

    fn convert_tools(tools: &[ToolDeclaration]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect()
    }

    fn convert_response_format(format: &ResponseFormat) -> Value {
        match format {
            ResponseFormat::JsonObject => json!({ "type": "json_object" }),
            ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            } => json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "schema": schema,
                    "strict": strict,
                }
            }),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatRequest {
        let options = &request.options;
        ChatRequest {
            model: self
                .config
                .model
                .clone()
                .unwrap_or_else(|| options.model.clone()),
            messages: Self::convert_messages(request),
            tools: Self::convert_tools(&request.tools),
            response_format: request
                .response_format
                .as_ref()
                .map(Self::convert_response_format),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: options.stop_sequences.clone(),
            stream: false,
        }
    }

    /// Convert a chat-completions response to an agent completion
    fn convert_completion(response: ChatResponse) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::InvalidResponse("response contained no choices".into()))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                // Ollama omits ids on some models
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                ToolCall::new(id, call.function.name, arguments_text(call.function.arguments))
            })
            .collect();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => Some(FinishReason::Stop),
            Some("length") => Some(FinishReason::Length),
            Some("tool_calls") => Some(FinishReason::ToolUse),
            Some("content_filter") => Some(FinishReason::ContentFilter),
            Some(_) => Some(FinishReason::Error),
            None if !tool_calls.is_empty() => Some(FinishReason::ToolUse),
            None => None,
        };

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason,
        })
    }
}

/// Arguments arrive as a JSON string, but some servers send the object itself
fn arguments_text(arguments: Value) -> String {
    match arguments {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn status_error(status: StatusCode, body: String) -> AgentError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AgentError::Timeout(body),
        s if s.is_server_error() => AgentError::ProviderUnavailable(format!("{s}: {body}")),
        s if s.is_client_error() => AgentError::InvalidRequest(format!("{s}: {body}")),
        s => AgentError::Provider(format!("{s}: {body}")),
    }
}

fn transport_error(err: &reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout(err.to_string())
    } else if err.is_connect() {
        AgentError::ProviderUnavailable(err.to_string())
    } else {
        AgentError::Provider(err.to_string())
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.build_body(request);
        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "sending chat completion"
        );

        let response = self
            .authorize(self.client.post(self.url("/v1/chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| {
                if e.is_decode() {
                    AgentError::InvalidResponse(format!("invalid chat completion: {e}"))
                } else {
                    transport_error(&e)
                }
            })?;

        Self::convert_completion(parsed)
    }

    async fn health_check(&self) -> Result<bool> {
        match self.authorize(self.client.get(self.url("/api/tags"))).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    stream: bool,
}

#[derive(Debug, Default, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn function_type() -> String {
    "function".into()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: Some(call.id.clone()),
            kind: function_type(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: Value::String(call.arguments_raw.clone()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}
