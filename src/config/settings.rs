//! Configuration settings for Itinera.

use crate::error::{ItineraError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub model: ModelSettings,
    pub orchestration: OrchestrationSettings,
    pub tools: ToolSettings,
    pub agents: AgentSettings,
    pub store: StoreSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.itinera".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Model provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ModelProviderKind {
    /// OpenAI chat completions.
    #[default]
    OpenAI,
    /// Replays a script file; no network access.
    Scripted,
}

impl std::str::FromStr for ModelProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ModelProviderKind::OpenAI),
            "scripted" | "script" => Ok(ModelProviderKind::Scripted),
            _ => Err(format!("Unknown model provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelProviderKind::OpenAI => write!(f, "openai"),
            ModelProviderKind::Scripted => write!(f, "scripted"),
        }
    }
}

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub provider: ModelProviderKind,
    /// Model used for the `default` alias and any unknown alias.
    pub default_model: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    pub temperature: f32,
    /// Alias to concrete model name, e.g. `smart = "gpt-4o"`.
    pub aliases: HashMap<String, String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: ModelProviderKind::OpenAI,
            default_model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            temperature: 0.2,
            aliases: HashMap::new(),
        }
    }
}

impl ModelSettings {
    /// Resolve a model alias to a concrete model name.
    pub fn resolve(&self, alias: &str) -> String {
        self.aliases
            .get(alias)
            .cloned()
            .unwrap_or_else(|| self.default_model.clone())
    }
}

/// Retry, budget and loop-guard bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    /// Coordinator re-prompts before giving up with an apology.
    pub coordinator_attempts: u32,
    /// Invalid outputs a worker may produce before escalating.
    pub worker_output_attempts: u32,
    /// Tool-call rounds per worker turn.
    pub worker_tool_budget: usize,
    /// Depth of the visited-agent window inspected by the loop guard.
    pub loop_window: usize,
    /// Activations of one worker allowed within the window.
    pub loop_max_repeats: usize,
    /// Consecutive self-handoffs allowed.
    pub self_handoff_limit: usize,
    /// Transfers allowed while handling one user message.
    pub max_transitions: usize,
    /// Deadline for handling one user message.
    pub session_timeout_secs: u64,
    /// Retries of a retryable failure on an idempotent tool.
    pub tool_retry_limit: u32,
    /// Read-only tool calls in flight at once within a group.
    pub max_concurrent_tool_calls: usize,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            coordinator_attempts: 3,
            worker_output_attempts: 3,
            worker_tool_budget: 5,
            loop_window: 6,
            loop_max_repeats: 2,
            self_handoff_limit: 1,
            max_transitions: 24,
            session_timeout_secs: 300,
            tool_retry_limit: 2,
            max_concurrent_tool_calls: 4,
        }
    }
}

impl OrchestrationSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Reject bounds that would disable a guard.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.coordinator_attempts == 0, "coordinator_attempts must be at least 1"),
            (self.worker_output_attempts == 0, "worker_output_attempts must be at least 1"),
            (self.worker_tool_budget == 0, "worker_tool_budget must be at least 1"),
            (self.loop_window == 0, "loop_window must be at least 1"),
            (
                self.loop_window > crate::conversation::VISITED_CAPACITY,
                "loop_window exceeds the visited stack capacity",
            ),
            (self.loop_max_repeats == 0, "loop_max_repeats must be at least 1"),
            (self.max_transitions == 0, "max_transitions must be at least 1"),
            (self.session_timeout_secs == 0, "session_timeout_secs must be at least 1"),
            (self.max_concurrent_tool_calls == 0, "max_concurrent_tool_calls must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ItineraError::Config(format!("[orchestration] {}", message))),
            None => Ok(()),
        }
    }
}

/// Tool provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Base URL of the HTTP adapter gateway. External tools fail without it.
    pub gateway_url: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            gateway_url: None,
            timeout_secs: 30,
        }
    }
}

impl ToolSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Agent roster settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentSettings {
    /// Register the optional verifier worker.
    pub verifier_enabled: bool,
    /// Agent name to model alias, e.g. `planner = "smart"`.
    pub aliases: HashMap<String, String>,
}

/// History store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store provider (sqlite, memory).
    pub provider: String,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.itinera/sessions.db".to_string(),
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory holding an `agents.toml` that overrides default prompts.
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };

        settings.orchestration.validate()?;
        Ok(settings)
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| ItineraError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("itinera")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.orchestration.coordinator_attempts, 3);
        assert_eq!(settings.orchestration.loop_window, 6);
        assert_eq!(settings.orchestration.worker_tool_budget, 5);
        assert!(!settings.agents.verifier_enabled);
        assert!(settings.orchestration.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [model]
            provider = "scripted"

            [model.aliases]
            smart = "gpt-4o"

            [orchestration]
            loop_window = 4

            [agents]
            verifier_enabled = true

            [agents.aliases]
            planner = "smart"
            "#,
        )
        .unwrap();

        assert_eq!(settings.model.provider, ModelProviderKind::Scripted);
        assert_eq!(settings.model.resolve("smart"), "gpt-4o");
        assert_eq!(settings.model.resolve("missing"), "gpt-4o-mini");
        assert_eq!(settings.orchestration.loop_window, 4);
        assert_eq!(settings.orchestration.max_transitions, 24);
        assert!(settings.agents.verifier_enabled);
        assert_eq!(settings.agents.aliases["planner"], "smart");
    }

    #[test]
    fn test_validation_rejects_zero_bounds() {
        let mut orchestration = OrchestrationSettings::default();
        orchestration.loop_max_repeats = 0;
        assert!(orchestration.validate().is_err());

        let mut orchestration = OrchestrationSettings::default();
        orchestration.loop_window = 1000;
        assert!(orchestration.validate().is_err());

        let mut orchestration = OrchestrationSettings::default();
        orchestration.max_concurrent_tool_calls = 0;
        assert!(orchestration.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.tools.gateway_url = Some("http://localhost:8088".to_string());
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.tools.gateway_url.as_deref(), Some("http://localhost:8088"));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("OpenAI".parse::<ModelProviderKind>().unwrap(), ModelProviderKind::OpenAI);
        assert!("anthropic".parse::<ModelProviderKind>().is_err());
    }
}
