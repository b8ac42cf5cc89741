//! Sessions command implementation.

use crate::cli::{Output, SessionsAction};
use crate::config::Settings;
use crate::store::create_store;
use anyhow::Result;

/// List or delete stored sessions.
pub async fn run_sessions(action: Option<&SessionsAction>, settings: Settings) -> Result<()> {
    let store = create_store(&settings)?;

    match action {
        None | Some(SessionsAction::List) => {
            let sessions = store.list_sessions().await?;
            if sessions.is_empty() {
                Output::info("No sessions yet. Use 'itinera plan <request>' to start one.");
                return Ok(());
            }
            Output::header(&format!("Sessions ({})", sessions.len()));
            println!();
            for summary in &sessions {
                Output::session_info(summary);
            }
        }
        Some(SessionsAction::Delete { session }) => {
            if store.delete(session).await? {
                Output::success(&format!("Deleted session {}", session));
            } else {
                Output::warning(&format!("Session not found: {}", session));
            }
        }
    }

    Ok(())
}
