//! Request Assembler
//!
//! Builds the outbound [`CompletionRequest`] from the session, the registry
//! and the optional structured response schema.

use crate::message::Message;
use crate::provider::{CompletionRequest, GenerationOptions, ResponseFormat};
use crate::schema::{StructuredOutputSchema, coercion_prompt};
use crate::session::Session;
use crate::tool::ToolRegistry;

/// Response-format directive for a structured response schema
#[must_use]
pub fn response_format(output: &StructuredOutputSchema) -> ResponseFormat {
    ResponseFormat::JsonSchema {
        name: output.name.clone(),
        schema: output.json_schema(),
        strict: output.strict,
    }
}

/// Request for the next round of the loop.
///
/// The `structured_output` pseudo-tool is only offered when no real tools
/// are registered. With real tools present the schema is honoured through
/// the response-format directive and the final coercion pass instead.
#[must_use]
pub fn assemble(
    session: &Session,
    tools: &ToolRegistry,
    output: Option<&StructuredOutputSchema>,
    options: &GenerationOptions,
) -> CompletionRequest {
    let include_pseudo_tool = output.is_some() && tools.is_empty();

    CompletionRequest {
        system_prompt: session
            .latest_system_prompt()
            .map(|prompt| prompt.content.clone()),
        messages: session.snapshot(),
        tools: tools.declare_all(include_pseudo_tool),
        response_format: output.map(response_format),
        options: options.clone(),
    }
}

/// One-off request asking the model to restate its answer as JSON.
///
/// The coercion prompt is appended to a copy of the history only; the
/// session itself is left untouched.
#[must_use]
pub fn assemble_coercion(
    session: &Session,
    output: &StructuredOutputSchema,
    options: &GenerationOptions,
) -> CompletionRequest {
    let mut messages = session.snapshot();
    messages.push(Message::user(coercion_prompt(&output.schema)));

    CompletionRequest {
        system_prompt: session
            .latest_system_prompt()
            .map(|prompt| prompt.content.clone()),
        messages,
        tools: Vec::new(),
        response_format: Some(response_format(output)),
        options: options.clone(),
    }
}
