//! Tool registry, dispatch and providers.
//!
//! A tool is declared once as a [`ToolSpec`] (schema, idempotency, side-effect
//! and confirmation flags). Agents never call a [`ToolProvider`] directly: every
//! invocation goes through [`ToolRegistry::invoke`], which enforces the
//! requesting agent's capability set, validates arguments and checks the
//! confirmation flag before any external request is made.

pub mod catalog;
mod local;
mod recording;
mod registry;

pub use catalog::builtin_tools;
pub use local::{GatewayClient, LocalToolProvider};
pub use recording::RecordingToolProvider;
pub use registry::{ToolOutput, ToolRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What a tool result contributes to the task context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    /// A list of places under `places`.
    Places,
    /// Web search hits.
    SearchResults,
    /// A full itinerary draft.
    Itinerary,
    /// A plan validation report.
    Validation,
    /// A created calendar event.
    CalendarEvent,
    /// A published page carrying a `url`.
    ShareLink,
}

/// Declaration of a single tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema the arguments must satisfy.
    pub input_schema: Value,
    /// Same arguments yield an equivalent output.
    pub idempotent: bool,
    /// Performs a write outside the process.
    pub external_side_effect: bool,
    /// Irreversible; refused unless the session carries a confirmation for it.
    pub requires_confirmation: bool,
    pub artifact: Artifact,
}

impl ToolSpec {
    pub fn is_read_only(&self) -> bool {
        !self.external_side_effect
    }
}

/// A tool invocation requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, if any.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Category of an external tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Timeout,
    RateLimited,
    InvalidInput,
    Upstream,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::RateLimited => "rate_limited",
            ToolErrorKind::InvalidInput => "invalid_input",
            ToolErrorKind::Upstream => "upstream",
        };
        f.write_str(label)
    }
}

/// Structured failure returned across the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl ToolError {
    /// Create an error with the default retry hint for its kind.
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        let retryable = !matches!(kind, ToolErrorKind::InvalidInput);
        Self {
            kind,
            retryable,
            message: message.into(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

/// Adapter that actually performs tool calls (maps, search, calendar, pages).
///
/// Implementations receive arguments that already passed schema validation and
/// must report every failure as a [`ToolError`] instead of panicking.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn invoke(&self, tool: &str, args: &Value) -> std::result::Result<Value, ToolError>;
}
