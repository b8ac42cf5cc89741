//! Error types for Itinera.

use crate::agent::AgentId;
use crate::tools::ToolError;
use thiserror::Error;

/// Library-level error type for Itinera operations.
///
/// The first five variants form the orchestration taxonomy. They are handled
/// inside the engine (retry, escalation, or an honest partial response) and
/// never escape [`crate::orchestrator::Orchestrator::handle_message`]. The rest
/// are infrastructure failures that do propagate.
#[derive(Error, Debug)]
pub enum ItineraError {
    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Tool invocation failed: {0}")]
    ToolInvocation(ToolError),

    #[error("Loop guard tripped: {agent} activated {occurrences} times in the last {window} transitions")]
    LoopGuard {
        agent: AgentId,
        occurrences: usize,
        window: usize,
    },

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model provider error: {0}")]
    Model(String),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ItineraError {
    /// Short machine-readable label, used in history records and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ItineraError::Routing(_) => "routing",
            ItineraError::ToolInvocation(_) => "tool_invocation",
            ItineraError::LoopGuard { .. } => "loop_guard",
            ItineraError::SchemaValidation(_) => "schema_validation",
            ItineraError::Permission(_) => "permission",
            ItineraError::Config(_) => "config",
            ItineraError::Session(_) => "session",
            ItineraError::NotFound(_) => "not_found",
            ItineraError::Timeout(_) => "timeout",
            ItineraError::InvalidInput(_) => "invalid_input",
            ItineraError::Model(_) => "model",
            ItineraError::OpenAI(_) => "openai",
            ItineraError::Io(_) => "io",
            ItineraError::Json(_) => "json",
            ItineraError::TomlParse(_) => "toml",
            ItineraError::Http(_) => "http",
            ItineraError::Database(_) => "database",
        }
    }
}

/// Result type alias for Itinera operations.
pub type Result<T> = std::result::Result<T, ItineraError>;
