//! Replay command implementation.

use crate::assembler::assemble;
use crate::cli::Output;
use crate::config::Settings;
use crate::session::Session;
use crate::store::create_store;
use anyhow::Result;

/// Rebuild a session from its stored log and print the assembled response.
pub async fn run_replay(session_id: &str, history: bool, settings: Settings) -> Result<()> {
    let store = create_store(&settings)?;
    let session = Session::open(store, session_id).await?;
    let state = session.state();

    if history {
        Output::header(&format!("History ({} records)", state.history().len()));
        for record in state.history() {
            Output::record(record);
        }
    }

    Output::response(&assemble(state));
    Output::kv("Active agent", state.active().as_str());
    Ok(())
}
