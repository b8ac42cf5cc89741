//! CLI command implementations.

mod chat;
mod config;
mod plan;
mod replay;
mod serve;
mod sessions;
mod tools;

pub use chat::run_chat;
pub use config::run_config;
pub use plan::run_plan;
pub use replay::run_replay;
pub use serve::run_serve;
pub use sessions::run_sessions;
pub use tools::run_tools;

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::store::{create_store, HistoryStore};
use std::path::Path;
use std::sync::Arc;

/// Orchestrator and store for commands that run agents.
fn engine(settings: &Settings, script: Option<&Path>) -> anyhow::Result<(Arc<Orchestrator>, Arc<dyn HistoryStore>)> {
    if let Err(e) = preflight::check(Operation::Run { scripted: script.is_some() }, settings) {
        Output::error(&e.to_string());
        Output::info("Pass --script FILE to run without a live model.");
        return Err(e.into());
    }

    let orchestrator = Arc::new(Orchestrator::from_settings(settings, script)?);
    let store = create_store(settings)?;
    Ok((orchestrator, store))
}
