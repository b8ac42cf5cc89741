//! Pre-flight checks before running agents.
//!
//! Validates that required configuration is available before starting a run
//! that would otherwise fail at the first model call.

use crate::config::{ModelProviderKind, Settings};
use crate::error::{ItineraError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running agents needs a model; a script file stands in for it.
    Run { scripted: bool },
    /// Reading stored sessions has no external requirements.
    Inspect,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Run { scripted: false } if settings.model.provider == ModelProviderKind::OpenAI => {
            check_api_key()?;
        }
        Operation::Run { .. } | Operation::Inspect => {}
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(ItineraError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(ItineraError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}
