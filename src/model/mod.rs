//! Model provider boundary and structured agent output.
//!
//! Providers return raw JSON. Nothing downstream looks at it until
//! [`OutputSchema::parse`] has validated it against the declared output schema
//! and deserialised it into [`StructuredOutput`]; a failure at either step is a
//! malformed signal, handled by the caller's bounded retry.

mod openai;
mod scripted;

pub use openai::{create_client, OpenAIModelProvider};
pub use scripted::ScriptedModelProvider;

use crate::agent::{AgentId, RouteTarget, TERMINATE};
use crate::error::{ItineraError, Result};
use crate::tools::{ToolCallRequest, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Who a turn message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    /// An earlier output of the agent itself.
    Assistant,
    /// A tool result or tool error fed back to the agent.
    Tool,
    /// Engine feedback, e.g. why the last output was rejected.
    Feedback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ModelMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Tool as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolSpec> for ToolSchema {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.input_schema.clone(),
        }
    }
}

/// Everything a provider needs to produce one agent output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub agent: AgentId,
    /// Concrete model name after alias resolution.
    pub model: String,
    pub system_prompt: String,
    /// Task context snapshot and incoming payload.
    pub context: Value,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSchema>,
    /// Targets the agent may name in a handoff.
    pub routes: Vec<RouteTarget>,
}

/// LLM backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Produce raw structured output for `request`.
    async fn generate(&self, request: &ModelRequest) -> Result<Value>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// The closed set of things an agent can say in one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredOutput {
    Handoff {
        #[serde(default)]
        target: Option<RouteTarget>,
        /// Equally valid targets, resolved by the agent's priority order.
        #[serde(default)]
        candidates: Vec<AgentId>,
        #[serde(default = "empty_object")]
        payload: Value,
        #[serde(default)]
        reason: Option<String>,
    },
    ToolCalls { calls: Vec<ToolCallRequest> },
    Completion {
        text: String,
        #[serde(default = "empty_object")]
        payload: Value,
    },
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl StructuredOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            StructuredOutput::Handoff { .. } => "handoff",
            StructuredOutput::ToolCalls { .. } => "tool_calls",
            StructuredOutput::Completion { .. } => "completion",
        }
    }
}

/// Compiled validator for [`StructuredOutput`].
pub struct OutputSchema {
    validator: jsonschema::Validator,
}

impl OutputSchema {
    pub fn new() -> Result<Self> {
        let validator = jsonschema::validator_for(&output_schema())
            .map_err(|e| ItineraError::Config(format!("Invalid output schema: {}", e)))?;
        Ok(Self { validator })
    }

    /// Validate and deserialise a raw provider output.
    pub fn parse(&self, raw: &Value) -> Result<StructuredOutput> {
        let errors: Vec<String> = self.validator.iter_errors(raw).map(|e| e.to_string()).collect();
        if !errors.is_empty() {
            return Err(ItineraError::SchemaValidation(format!(
                "Output does not match the schema: {}",
                errors.join("; ")
            )));
        }

        serde_json::from_value(raw.clone())
            .map_err(|e| ItineraError::SchemaValidation(format!("Output could not be decoded: {}", e)))
    }
}

/// JSON Schema every agent output must satisfy.
pub fn output_schema() -> Value {
    let agents: Vec<&str> = AgentId::ALL.iter().map(|a| a.as_str()).collect();
    let mut targets = agents.clone();
    targets.push(TERMINATE);

    json!({
        "oneOf": [
            {
                "type": "object",
                "properties": {
                    "kind": {"const": "handoff"},
                    "target": {"type": ["string", "null"], "enum": targets.iter().map(|t| json!(t)).chain([Value::Null]).collect::<Vec<_>>()},
                    "candidates": {"type": "array", "items": {"type": "string", "enum": agents}},
                    "payload": {"type": "object"},
                    "reason": {"type": ["string", "null"]}
                },
                "required": ["kind"],
                "additionalProperties": false
            },
            {
                "type": "object",
                "properties": {
                    "kind": {"const": "tool_calls"},
                    "calls": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": ["string", "null"]},
                                "name": {"type": "string", "minLength": 1},
                                "arguments": {"type": "object"}
                            },
                            "required": ["name"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["kind", "calls"],
                "additionalProperties": false
            },
            {
                "type": "object",
                "properties": {
                    "kind": {"const": "completion"},
                    "text": {"type": "string"},
                    "payload": {"type": "object"}
                },
                "required": ["kind", "text"],
                "additionalProperties": false
            }
        ]
    })
}
