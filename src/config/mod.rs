//! Configuration module for Itinera.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AgentPrompt, FeedbackPrompts, Prompts};
pub use settings::{
    AgentSettings, GeneralSettings, ModelProviderKind, ModelSettings, OrchestrationSettings,
    PromptSettings, Settings, StoreSettings, ToolSettings,
};
