//! Interactive planning session.

use super::engine;
use crate::cli::Output;
use crate::config::Settings;
use crate::session::Session;
use anyhow::Result;
use console::style;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Run the interactive chat command.
pub async fn run_chat(session_id: Option<String>, script: Option<PathBuf>, settings: Settings) -> Result<()> {
    let (orchestrator, store) = engine(&settings, script.as_deref())?;

    let mut session = match &session_id {
        Some(id) => Session::open_or_create(store.clone(), id).await?,
        None => Session::create(store.clone(), None).await?,
    };

    println!("\n{}", style("Itinera").bold().cyan());
    println!(
        "{}\n",
        style("Describe your trip, or 'exit' to quit. 'confirm <tool>' allows an irreversible tool, 'new' starts over.")
            .dim()
    );
    Output::kv("Session", session.id());

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("new") {
            session = Session::create(store.clone(), None).await?;
            Output::info(&format!("Started session {}", session.id()));
            continue;
        }

        if let Some(tool) = input.strip_prefix("confirm ").map(str::trim) {
            if orchestrator.runtime().registry.spec(tool).is_none() {
                Output::warning(&format!("Unknown tool: {}", tool));
                continue;
            }
            match session.confirm(tool).await {
                Ok(()) => Output::success(&format!("Confirmed {}", tool)),
                Err(e) => Output::error(&format!("Error: {}", e)),
            }
            continue;
        }

        if session.state().is_terminal() {
            Output::warning("This session has ended. Type 'new' to start another.");
            continue;
        }

        let spinner = Output::spinner("Agents working...");
        let result = orchestrator.handle_message(&mut session, input).await;
        spinner.finish_and_clear();

        match result {
            Ok(response) => Output::response(&response),
            Err(e) => Output::error(&format!("Error: {}", e)),
        }
    }

    Ok(())
}
