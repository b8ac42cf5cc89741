//! Plan command implementation.

use super::engine;
use crate::cli::Output;
use crate::config::Settings;
use crate::session::Session;
use anyhow::Result;
use std::path::PathBuf;

/// Run a single request end to end.
pub async fn run_plan(
    request: &str,
    confirm: &[String],
    confirm_all: bool,
    session_id: Option<String>,
    script: Option<PathBuf>,
    json: bool,
    settings: Settings,
) -> Result<()> {
    let (orchestrator, store) = engine(&settings, script.as_deref())?;

    let mut session = match &session_id {
        Some(id) => Session::open_or_create(store, id).await?,
        None => Session::create(store, None).await?,
    };

    let mut tools: Vec<String> = confirm.to_vec();
    if confirm_all {
        tools.extend(
            orchestrator
                .runtime()
                .registry
                .specs()
                .filter(|spec| spec.requires_confirmation)
                .map(|spec| spec.name.clone()),
        );
    }
    for tool in tools {
        if orchestrator.runtime().registry.spec(&tool).is_none() {
            anyhow::bail!("Unknown tool: {} (see 'itinera tools')", tool);
        }
        if !session.state().is_confirmed(&tool) {
            session.confirm(&tool).await?;
        }
    }

    let spinner = Output::spinner("Agents working...");
    let result = orchestrator.handle_message(&mut session, request).await;
    spinner.finish_and_clear();

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            Output::error(&format!("Planning failed: {}", e));
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        Output::response(&response);
        if !response.is_terminal() {
            Output::info(&format!(
                "Answer with: itinera plan --session {} \"...\"",
                response.session_id
            ));
        }
    }

    Ok(())
}
