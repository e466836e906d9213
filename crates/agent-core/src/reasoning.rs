//! Reasoning Loop
//!
//! Drives the request → tool dispatch → request cycle until the model stops
//! asking for tools, then optionally coerces the answer into the structured
//! response schema.
//!
//! ```text
//! Idle → Requesting → Interpreting → (Dispatching → Requesting)* → Finalizing → Idle
//! ```
//!
//! The agent's state lock is only held while assembling a request or
//! appending to history, never across a backend or tool call. A second lock
//! serializes top-level calls on the same agent.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::assembler::{assemble, assemble_coercion};
use crate::config::{AgentConfig, ToolErrorPolicy, UnknownToolPolicy};
use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, CompletionRequest, LlmBackend, TokenUsage};
use crate::remote::{self, RemoteToolTransport};
use crate::schema::{self, STRUCTURED_OUTPUT_TOOL, Schema, StructuredOutputSchema};
use crate::session::{Session, SessionId, SystemPrompt};
use crate::tool::{LocalTool, Tool, ToolArguments, ToolCall, ToolOrigin, ToolRegistry, ToolResult};

/// Phase of the reasoning loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Requesting,
    Interpreting,
    Dispatching,
    Finalizing,
}

/// Final answer of a top-level call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Text of the final assistant turn
    pub content: String,

    /// Tool calls left on the final turn (always empty on success)
    pub tool_calls: Vec<ToolCall>,

    /// Value matching the structured response schema, when one was set and parsed
    pub structured: Option<Value>,

    /// Every tool result produced during this call, in dispatch order
    pub tool_results: Vec<ToolResult>,

    /// Request/dispatch rounds used
    pub rounds: u32,

    /// Model that produced the final turn
    pub model: String,

    /// Token usage summed over all requests
    pub usage: TokenUsage,
}

impl Response {
    /// Deserialize the structured value into a caller type
    pub fn parse_into<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.structured.clone().ok_or_else(|| {
            AgentError::StructuredParseFailed("response carries no structured output".into())
        })?;
        serde_json::from_value(value).map_err(|e| AgentError::StructuredParseFailed(e.to_string()))
    }
}

struct AgentState {
    session: Session,
    tools: ToolRegistry,
    output: Option<StructuredOutputSchema>,
}

/// Bookkeeping for one top-level call
#[derive(Default)]
struct RunLedger {
    tool_results: Vec<ToolResult>,
    usage: TokenUsage,
    rounds: u32,
    /// Set once the model answered through the pseudo-tool
    structured: Option<Value>,
}

/// The main Agent struct
pub struct Agent {
    name: String,
    backend: Arc<dyn LlmBackend>,
    config: AgentConfig,
    state: Mutex<AgentState>,
    run_lock: Mutex<()>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn LlmBackend>,
        config: AgentConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            backend,
            config,
            state: Mutex::new(AgentState {
                session: Session::new(),
                tools: ToolRegistry::new(),
                output: None,
            }),
            run_lock: Mutex::new(()),
        })
    }

    /// Create with default configuration
    pub fn with_defaults(name: impl Into<String>, backend: Arc<dyn LlmBackend>) -> Result<Self> {
        Self::new(name, backend, AgentConfig::default())
    }

    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn session_id(&self) -> SessionId {
        self.state.lock().await.session.id.clone()
    }

    /// Add a versioned system prompt; the latest one is sent with every request
    pub async fn add_system_prompt(&self, content: impl Into<String>, version: impl Into<String>) {
        self.state
            .lock()
            .await
            .session
            .add_system_prompt(content, version);
    }

    pub async fn latest_system_prompt(&self) -> Option<SystemPrompt> {
        self.state
            .lock()
            .await
            .session
            .latest_system_prompt()
            .cloned()
    }

    /// Append background information as a system turn
    pub async fn inject_context(&self, context: impl AsRef<str>) {
        let content = format!(
            "Here is important context information to use when answering questions:\n\n{}",
            context.as_ref()
        );
        self.state.lock().await.session.append_system_turn(content);
    }

    /// Register a local tool backed by a handler function
    pub async fn add_tool<F>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &Schema,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ToolArguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .await
            .tools
            .register_local(name, description, parameters, handler)
    }

    /// Register any tool implementation
    pub async fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.state.lock().await.tools.register(tool)
    }

    /// Discover a remote transport's tools and register them.
    ///
    /// Returns how many tools were added; names already taken are skipped.
    pub async fn add_remote_tools(&self, transport: Arc<dyn RemoteToolTransport>) -> Result<usize> {
        let discovered = remote::discover(transport, self.config.remote_call_timeout()).await?;
        let offered = discovered.len();

        let added = self
            .state
            .lock()
            .await
            .tools
            .register_remote_batch(discovered);

        tracing::info!(agent = %self.name, offered, added, "remote tools registered");
        Ok(added)
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .tools
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Ask for answers shaped by `output`
    pub async fn set_structured_output(&self, output: StructuredOutputSchema) {
        let mut state = self.state.lock().await;
        state.tools.set_structured_output(Some(&output));
        state.output = Some(output);
    }

    pub async fn clear_structured_output(&self) {
        let mut state = self.state.lock().await;
        state.tools.set_structured_output(None);
        state.output = None;
    }

    /// Copy of the conversation history
    pub async fn history(&self) -> Vec<Message> {
        self.state.lock().await.session.snapshot()
    }

    /// Explicit history reset
    pub async fn reset_history(&self) {
        self.state.lock().await.session.reset_history();
    }

    /// Rounds completed in the current (or last) top-level call
    pub async fn depth(&self) -> u32 {
        self.state.lock().await.session.depth()
    }

    /// Run the agent on a user query
    pub async fn run(&self, query: impl Into<String>) -> Result<Response> {
        self.run_with_cancel(query, &CancellationToken::new()).await
    }

    /// Run the agent on a user query, honouring `cancel`
    #[tracing::instrument(skip_all, fields(agent = %self.name))]
    pub async fn run_with_cancel(
        &self,
        query: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let query = query.into();
        let _run = self.run_lock.lock().await;
        {
            let mut state = self.state.lock().await;
            state.session.reset_depth();
            state.session.append_user_turn(query);
        }
        self.drive(cancel).await
    }

    /// Continue the conversation with caller-built messages
    pub async fn ask(&self, messages: Vec<Message>) -> Result<Response> {
        self.ask_with_cancel(messages, &CancellationToken::new()).await
    }

    /// Continue the conversation with caller-built messages, honouring `cancel`
    #[tracing::instrument(skip_all, fields(agent = %self.name, messages = messages.len()))]
    pub async fn ask_with_cancel(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let _run = self.run_lock.lock().await;
        {
            let mut state = self.state.lock().await;
            state.session.reset_depth();
            state.session.append_all(messages)?;
        }
        self.drive(cancel).await
    }

    async fn drive(&self, cancel: &CancellationToken) -> Result<Response> {
        tracing::info!(backend = self.backend.name(), "run started");
        let outcome = self.drive_loop(cancel).await;

        self.state.lock().await.session.set_outstanding(false);
        match &outcome {
            Ok(response) => tracing::info!(
                rounds = response.rounds,
                tool_calls = response.tool_results.len(),
                structured = response.structured.is_some(),
                "run finished"
            ),
            Err(e) => tracing::warn!(error = %e, "run failed"),
        }
        outcome
    }

    async fn drive_loop(&self, cancel: &CancellationToken) -> Result<Response> {
        let max_depth = self.config.max_tool_call_depth;
        let mut ledger = RunLedger::default();

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            tracing::debug!(state = ?LoopState::Requesting, round = ledger.rounds + 1);
            let (request, output) = {
                let mut state = self.state.lock().await;
                state.session.set_outstanding(true);
                let request = assemble(
                    &state.session,
                    &state.tools,
                    state.output.as_ref(),
                    &self.config.generation,
                );
                (request, state.output.clone())
            };

            let completion = self.send(&request, cancel).await;
            self.state.lock().await.session.set_outstanding(false);
            let completion = completion?;
            if let Some(usage) = completion.usage {
                ledger.usage += usage;
            }

            tracing::debug!(
                state = ?LoopState::Interpreting,
                tool_calls = completion.tool_calls.len()
            );
            if completion.tool_calls.is_empty() {
                self.state
                    .lock()
                    .await
                    .session
                    .append_assistant_turn(completion.content.clone(), Vec::new());
                return self.finalize(completion, output.as_ref(), ledger, cancel).await;
            }

            // Answer given entirely through the pseudo-tool
            if let Some(output) = &output {
                let only_pseudo = completion
                    .tool_calls
                    .iter()
                    .all(|call| call.name == STRUCTURED_OUTPUT_TOOL);
                let value = completion
                    .tool_calls
                    .first()
                    .and_then(|call| pseudo_tool_value(call, &output.schema).ok());

                if let (true, Some(value)) = (only_pseudo, value) {
                    let content = if completion.content.trim().is_empty() {
                        value.to_string()
                    } else {
                        completion.content.clone()
                    };
                    self.state
                        .lock()
                        .await
                        .session
                        .append_assistant_turn(content.clone(), Vec::new());

                    return Ok(Response {
                        content,
                        tool_calls: Vec::new(),
                        structured: Some(value),
                        tool_results: ledger.tool_results,
                        rounds: ledger.rounds,
                        model: completion.model,
                        usage: ledger.usage,
                    });
                }
            }

            reject_duplicate_call_ids(&completion.tool_calls)?;

            let content = if completion.content.trim().is_empty() {
                self.config.empty_assistant_filler.clone()
            } else {
                completion.content.clone()
            };
            self.state
                .lock()
                .await
                .session
                .append_assistant_turn(content, completion.tool_calls.clone());

            tracing::debug!(state = ?LoopState::Dispatching);
            for call in &completion.tool_calls {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let result = match &output {
                    Some(output) if call.name == STRUCTURED_OUTPUT_TOOL => {
                        match pseudo_tool_value(call, &output.schema) {
                            Ok(value) => {
                                ledger.structured = Some(value);
                                ToolResult::success(call, "Structured output recorded.")
                            }
                            Err(problem) => ToolResult::failure(call, problem),
                        }
                    }
                    _ => self.dispatch(call, cancel).await?,
                };

                self.state.lock().await.session.append_tool_result_turn(
                    &result.tool_call_id,
                    result.name.clone(),
                    result.result_text.clone(),
                )?;
                ledger.tool_results.push(result);
            }

            let depth = self.state.lock().await.session.increment_depth();
            ledger.rounds = depth;
            if depth >= max_depth {
                tracing::warn!(depth, max_depth, "tool call depth exhausted");
                return Err(AgentError::DepthExceeded(max_depth));
            }
        }
    }

    /// Call the backend, retrying transient failures with linear backoff
    async fn send(&self, request: &CompletionRequest, cancel: &CancellationToken) -> Result<Completion> {
        let max_attempts = self.config.max_retry;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
                outcome = self.backend.complete(request) => outcome,
            };

            match outcome {
                Ok(completion) => return Ok(completion),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        backend = self.backend.name(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "backend call failed"
                    );
                    last_error = e.to_string();

                    if attempt < max_attempts {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => return Err(AgentError::Cancelled),
                            () = tokio::time::sleep(self.config.backoff(attempt)) => {}
                        }
                    }
                }
            }
        }

        Err(AgentError::BackendUnavailable {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Execute one tool call against the registry
    async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<ToolResult> {
        let tool = self.state.lock().await.tools.get(&call.name);

        let Some(tool) = tool else {
            return match self.config.unknown_tool_policy {
                UnknownToolPolicy::Fail => Err(AgentError::ToolNotFound(call.name.clone())),
                UnknownToolPolicy::Skip => {
                    tracing::warn!(tool = %call.name, "model requested an unknown tool, skipping");
                    Ok(ToolResult::failure(
                        call,
                        format!("tool '{}' is not available", call.name),
                    ))
                }
            };
        };

        let arguments = call.decode_arguments()?;
        tool.validate(&arguments)?;

        let origin = tool.origin();
        tracing::debug!(tool = %call.name, %origin, call_id = %call.id, "executing tool");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            outcome = tool.invoke(arguments) => outcome,
        };

        match outcome {
            Ok(text) => Ok(ToolResult::success(call, text)),
            Err(AgentError::ToolExecutionFailed { message, .. })
                if origin == ToolOrigin::Local
                    && self.config.tool_error_policy == ToolErrorPolicy::ReportToModel =>
            {
                tracing::warn!(tool = %call.name, error = %message, "tool failed, reporting to model");
                Ok(ToolResult::failure(call, message))
            }
            Err(e) => Err(e),
        }
    }

    /// Turn the last completion into a response, coercing structure if needed
    async fn finalize(
        &self,
        completion: Completion,
        output: Option<&StructuredOutputSchema>,
        mut ledger: RunLedger,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        tracing::debug!(state = ?LoopState::Finalizing);

        let mut response = Response {
            content: completion.content,
            tool_calls: Vec::new(),
            structured: ledger.structured.take(),
            tool_results: ledger.tool_results,
            rounds: ledger.rounds,
            model: completion.model,
            usage: ledger.usage,
        };

        let Some(output) = output else {
            return Ok(response);
        };
        if response.structured.is_some() {
            return Ok(response);
        }

        if let Ok(parsed) = schema::parse(&response.content, &output.schema) {
            response.structured = Some(parsed.value);
            return Ok(response);
        }

        let request = {
            let state = self.state.lock().await;
            assemble_coercion(&state.session, output, &self.config.generation)
        };

        match self.send(&request, cancel).await {
            Ok(coerced) => {
                if let Some(usage) = coerced.usage {
                    response.usage += usage;
                }
                match schema::parse(&coerced.content, &output.schema) {
                    Ok(parsed) => response.structured = Some(parsed.value),
                    Err(e) => {
                        tracing::warn!(error = %e, "structured output unavailable, returning plain text");
                    }
                }
            }
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "structured output request failed, returning plain text");
            }
        }

        Ok(response)
    }
}

/// Each result must pair with exactly one call, so ids may not repeat in a turn
fn reject_duplicate_call_ids(calls: &[ToolCall]) -> Result<()> {
    let mut seen = HashSet::with_capacity(calls.len());
    match calls.iter().find(|call| !seen.insert(call.id.as_str())) {
        Some(call) => Err(AgentError::ArgumentDecodeFailed {
            tool: call.name.clone(),
            message: format!("tool call id '{}' repeated within one turn", call.id),
        }),
        None => Ok(()),
    }
}

/// Arguments of a `structured_output` call, checked against the schema
fn pseudo_tool_value(call: &ToolCall, schema: &Schema) -> std::result::Result<Value, String> {
    let arguments = call.decode_arguments().map_err(|e| e.to_string())?;
    let value = Value::Object(arguments);
    schema.validate(&value)?;
    Ok(value)
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    name: String,
    backend: Option<Arc<dyn LlmBackend>>,
    tools: Vec<Arc<dyn Tool>>,
    prompts: Vec<SystemPrompt>,
    output: Option<StructuredOutputSchema>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "agent".into(),
            backend: None,
            tools: Vec::new(),
            prompts: Vec::new(),
            output: None,
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn local_tool<F>(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: &Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.tool(Arc::new(LocalTool::new(name, description, parameters, handler)))
    }

    #[must_use]
    pub fn system_prompt(mut self, content: impl Into<String>, version: impl Into<String>) -> Self {
        self.prompts.push(SystemPrompt {
            content: content.into(),
            version: version.into(),
        });
        self
    }

    #[must_use]
    pub fn structured_output(mut self, output: StructuredOutputSchema) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_tool_call_depth(mut self, max: u32) -> Self {
        self.config.max_tool_call_depth = max;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let backend = self
            .backend
            .ok_or_else(|| AgentError::Config("Backend is required".into()))?;

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool)?;
        }
        tools.set_structured_output(self.output.as_ref());

        let mut session = Session::new();
        for prompt in self.prompts {
            session.add_system_prompt(prompt.content, prompt.version);
        }

        self.config.validate()?;
        Ok(Agent {
            name: self.name,
            backend,
            config: self.config,
            state: Mutex::new(AgentState {
                session,
                tools,
                output: self.output,
            }),
            run_lock: Mutex::new(()),
        })
    }
}
