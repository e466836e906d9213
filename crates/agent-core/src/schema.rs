//! Schema Coercion
//!
//! A small JSON-Schema-like tree used for tool parameters and for the
//! caller-defined structured response. A structured response schema is
//! offered to the model as the `structured_output` pseudo-tool, sent as a
//! response-format directive, and used to parse the final answer back out of
//! free text.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AgentError, Result};
use crate::tool::ToolDeclaration;

/// Name of the synthetic tool carrying the structured response schema
pub const STRUCTURED_OUTPUT_TOOL: &str = "structured_output";

/// JSON Schema primitive type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Schema node: type, description, enum, nested properties, required fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form format hint (e.g. "date-time")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default)]
    pub nullable: bool,

    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,

    /// Element schema for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    #[must_use]
    pub const fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            description: None,
            format: None,
            nullable: false,
            enum_values: Vec::new(),
            items: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    #[must_use]
    pub const fn object() -> Self {
        Self::new(SchemaType::Object)
    }

    #[must_use]
    pub const fn string() -> Self {
        Self::new(SchemaType::String)
    }

    #[must_use]
    pub const fn number() -> Self {
        Self::new(SchemaType::Number)
    }

    #[must_use]
    pub const fn integer() -> Self {
        Self::new(SchemaType::Integer)
    }

    #[must_use]
    pub const fn boolean() -> Self {
        Self::new(SchemaType::Boolean)
    }

    #[must_use]
    pub fn array(items: Self) -> Self {
        let mut schema = Self::new(SchemaType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Add an optional property
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: Self) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Add a property and mark it required
    #[must_use]
    pub fn required_property(mut self, name: impl Into<String>, schema: Self) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Render as the JSON Schema object providers expect
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        self.render(false)
    }

    /// Render for strict enforcement: every object closes `additionalProperties`
    #[must_use]
    pub fn to_strict_json_schema(&self) -> Value {
        self.render(true)
    }

    fn render(&self, strict: bool) -> Value {
        let mut out = Map::new();

        let type_value = if self.nullable {
            json!([self.schema_type.as_str(), "null"])
        } else {
            json!(self.schema_type.as_str())
        };
        out.insert("type".into(), type_value);

        if let Some(description) = &self.description {
            out.insert("description".into(), json!(description));
        }
        if let Some(format) = &self.format {
            out.insert("format".into(), json!(format));
        }
        if !self.enum_values.is_empty() {
            out.insert("enum".into(), json!(self.enum_values));
        }
        if let Some(items) = &self.items {
            out.insert("items".into(), items.render(strict));
        }
        if self.schema_type == SchemaType::Object {
            let properties: Map<String, Value> = self
                .properties
                .iter()
                .map(|(name, prop)| (name.clone(), prop.render(strict)))
                .collect();
            out.insert("properties".into(), Value::Object(properties));
            out.insert("required".into(), json!(self.required));
            if strict {
                out.insert("additionalProperties".into(), Value::Bool(false));
            }
        }

        Value::Object(out)
    }

    /// Check a decoded value against this schema (types and required fields)
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> std::result::Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(format!("{path}: expected {}, found null", self.schema_type.as_str()))
            };
        }

        let type_ok = match self.schema_type {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
        };
        if !type_ok {
            return Err(format!("{path}: expected {}", self.schema_type.as_str()));
        }

        if !self.enum_values.is_empty() {
            if let Some(s) = value.as_str() {
                if !self.enum_values.iter().any(|e| e == s) {
                    return Err(format!("{path}: '{s}' is not one of {:?}", self.enum_values));
                }
            }
        }

        if let Some(obj) = value.as_object() {
            for field in &self.required {
                if !obj.contains_key(field) {
                    return Err(format!("{path}: missing required field '{field}'"));
                }
            }
            for (name, prop) in &self.properties {
                if let Some(child) = obj.get(name) {
                    prop.validate_at(child, &format!("{path}.{name}"))?;
                }
            }
        }

        if let (Some(items), Some(arr)) = (&self.items, value.as_array()) {
            for (i, item) in arr.iter().enumerate() {
                items.validate_at(item, &format!("{path}[{i}]"))?;
            }
        }

        Ok(())
    }
}

/// Caller-defined shape for the final answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutputSchema {
    /// Schema name sent with the response-format directive
    pub name: String,

    /// What the structure represents
    pub description: String,

    /// Ask providers to enforce the schema strictly
    #[serde(default)]
    pub strict: bool,

    pub schema: Schema,
}

impl StructuredOutputSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            strict: false,
            schema,
        }
    }

    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// JSON Schema sent to providers, closed when `strict` is set
    #[must_use]
    pub fn json_schema(&self) -> Value {
        if self.strict {
            self.schema.to_strict_json_schema()
        } else {
            self.schema.to_json_schema()
        }
    }
}

/// Wrap a structured response schema as an ordinary tool declaration
#[must_use]
pub fn to_pseudo_tool(output: &StructuredOutputSchema) -> ToolDeclaration {
    let description = if output.description.is_empty() {
        "Return the final answer as structured output".to_string()
    } else {
        output.description.clone()
    };
    ToolDeclaration::new(STRUCTURED_OUTPUT_TOOL, description, output.json_schema())
}

/// Where a structured value was found in the model's text
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseSource {
    /// The whole reply was JSON
    Direct,
    /// Extracted from a fenced code block
    Fenced,
    /// Extracted from the outermost braces of surrounding prose
    Inline,
}

/// A structured value recovered from model output
#[derive(Clone, Debug, PartialEq)]
pub struct Parsed {
    pub value: Value,
    pub source: ParseSource,
}

/// Parse model output against `schema`.
///
/// Tries the whole text as JSON first, then a fenced ```json block, then
/// every JSON value embedded in the prose, in order. Returns
/// [`AgentError::StructuredParseFailed`] when nothing decodes into a value
/// that satisfies the schema.
pub fn parse(raw: &str, schema: &Schema) -> Result<Parsed> {
    let mut last_problem = String::from("no JSON found");

    let decoded = [
        (Some(raw.trim()), ParseSource::Direct),
        (extract_fenced_json(raw), ParseSource::Fenced),
    ]
    .into_iter()
    .filter_map(|(text, source)| text.map(|text| (text, source)))
    .map(|(text, source)| (serde_json::from_str::<Value>(text), source));

    for (outcome, source) in decoded {
        match outcome {
            Ok(value) => match schema.validate(&value) {
                Ok(()) => return Ok(recovered(value, source)),
                Err(problem) => last_problem = problem,
            },
            Err(e) => last_problem = e.to_string(),
        }
    }

    for value in extract_inline_json(raw) {
        match schema.validate(&value) {
            Ok(()) => return Ok(recovered(value, ParseSource::Inline)),
            Err(problem) => last_problem = problem,
        }
    }

    Err(AgentError::StructuredParseFailed(last_problem))
}

fn recovered(value: Value, source: ParseSource) -> Parsed {
    if source != ParseSource::Direct {
        tracing::debug!(?source, "structured output recovered via fallback");
    }
    Parsed { value, source }
}

/// Parse model output straight into a caller type
pub fn parse_as<T: DeserializeOwned>(raw: &str, schema: &Schema) -> Result<T> {
    let parsed = parse(raw, schema)?;
    serde_json::from_value(parsed.value)
        .map_err(|e| AgentError::StructuredParseFailed(e.to_string()))
}

/// Body of the first fenced code block holding JSON.
///
/// Prefers a block tagged `json`; otherwise an untagged block whose body
/// starts with `{` or `[`.
#[must_use]
pub fn extract_fenced_json(text: &str) -> Option<&str> {
    const TAGGED: &str = "```json";
    const FENCE: &str = "```";

    if let Some(start) = text.find(TAGGED) {
        let body = &text[start + TAGGED.len()..];
        let end = body.find(FENCE)?;
        return Some(body[..end].trim());
    }

    let mut rest = text;
    while let Some(start) = rest.find(FENCE) {
        let after = &rest[start + FENCE.len()..];
        // skip an info string such as ```javascript
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        let end = body.find(FENCE)?;
        let inner = body[..end].trim();
        if inner.starts_with('{') || inner.starts_with('[') {
            return Some(inner);
        }
        rest = &body[end + FENCE.len()..];
    }

    None
}

/// JSON objects and arrays embedded in free text, in order of appearance.
///
/// Each `{` or `[` is tried as the start of a value; a successful decode
/// skips past the bytes it consumed.
fn extract_inline_json(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut offset = 0;

    while let Some(found) = text[offset..].find(['{', '[']) {
        let start = offset + found;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                values.push(value);
                offset = start + stream.byte_offset();
            }
            _ => offset = start + 1,
        }
    }

    values
}

/// Human-readable field list for coercion prompts
#[must_use]
pub fn describe(schema: &Schema) -> String {
    if schema.properties.is_empty() {
        return match &schema.description {
            Some(d) => format!("a {} ({d})", schema.schema_type.as_str()),
            None => format!("a {}", schema.schema_type.as_str()),
        };
    }

    schema
        .properties
        .iter()
        .map(|(name, prop)| {
            let mut field = format!("{name} ({}", prop.schema_type.as_str());
            if schema.required.contains(name) {
                field.push_str(", required");
            }
            field.push(')');
            if let Some(d) = &prop.description {
                field.push_str(": ");
                field.push_str(d);
            }
            if !prop.enum_values.is_empty() {
                field.push_str(&format!(" [one of: {}]", prop.enum_values.join(", ")));
            }
            field
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Final request asking the model to restate its answer as JSON
#[must_use]
pub fn coercion_prompt(schema: &Schema) -> String {
    format!(
        "Based on the information provided, respond ONLY with a valid JSON object containing these fields: {}.",
        describe(schema)
    )
}
