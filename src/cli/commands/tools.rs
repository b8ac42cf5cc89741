//! Tools command implementation.

use crate::agent::AgentRoster;
use crate::cli::Output;
use crate::config::Settings;
use crate::tools::builtin_tools;
use anyhow::Result;

/// List the tool catalog with its flags and permitted agents.
pub fn run_tools(settings: Settings) -> Result<()> {
    let roster = AgentRoster::standard(settings.agents.verifier_enabled);

    Output::header("Tools");
    for spec in builtin_tools() {
        let mut flags = Vec::new();
        if spec.idempotent {
            flags.push("idempotent");
        }
        if spec.external_side_effect {
            flags.push("side effect");
        }
        if spec.requires_confirmation {
            flags.push("needs confirmation");
        }
        let agents: Vec<&str> = roster
            .iter()
            .filter(|agent| agent.can_use(&spec.name))
            .map(|agent| agent.id.as_str())
            .collect();

        println!();
        Output::list_item(&spec.name);
        Output::kv("About", &spec.description);
        Output::kv("Flags", &flags.join(", "));
        Output::kv("Agents", &agents.join(", "));
    }

    if settings.tools.gateway_url.is_none() {
        println!();
        Output::warning("No [tools] gateway_url configured; only the planner's local tools will work.");
    }
    Ok(())
}
