//! In-memory test doubles for the backend and the remote transport.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{AgentError, Result};
use crate::provider::{Completion, CompletionRequest, LlmBackend};
use crate::remote::{RemotePayload, RemoteToolSpec, RemoteToolTransport};
use crate::tool::{Tool, ToolArguments, ToolCall, ToolDeclaration, ToolOrigin};

/// Backend that replays scripted completions and records every request
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<Completion>>>,
    repeat: Option<Completion>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, completion: Completion) -> Self {
        self.script.lock().unwrap().push_back(Ok(completion));
        self
    }

    pub fn text(self, content: &str) -> Self {
        self.reply(Completion::text(content))
    }

    pub fn tool_calls(self, calls: &[(&str, &str, &str)]) -> Self {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect();
        self.reply(Completion::with_tool_calls(calls))
    }

    pub fn fail(self, error: AgentError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// Returned once the script is exhausted
    pub fn always(mut self, completion: Completion) -> Self {
        self.repeat = Some(completion);
        self
    }

    /// Every call waits this long before answering
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(step) => step,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| AgentError::Provider("script exhausted".into())),
        }
    }
}

/// Remote transport serving canned payloads
pub struct FakeTransport {
    tools: Vec<(RemoteToolSpec, RemotePayload)>,
    calls: Mutex<Vec<String>>,
    connected: AtomicBool,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            delay: None,
        }
    }

    pub fn with_tool(mut self, name: &str, payload: RemotePayload) -> Self {
        self.tools.push((
            RemoteToolSpec {
                name: name.into(),
                description: Some(format!("remote {name}")),
                parameters: json!({"type": "object", "properties": {}}),
            },
            payload,
        ));
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteToolTransport for FakeTransport {
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>> {
        Ok(self.tools.iter().map(|(spec, _)| spec.clone()).collect())
    }

    async fn call_tool(&self, name: &str, _arguments: ToolArguments) -> Result<RemotePayload> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(name.to_string());
        self.tools
            .iter()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| AgentError::RemoteTransport(format!("unknown remote tool {name}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Bare remote-origin tool for registry tests
pub struct FakeRemoteTool {
    name: String,
}

impl FakeRemoteTool {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for FakeRemoteTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(&self.name, "remote", json!({"type": "object", "properties": {}}))
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Remote
    }

    async fn invoke(&self, _arguments: ToolArguments) -> Result<String> {
        Ok(format!("remote:{}", self.name))
    }
}
