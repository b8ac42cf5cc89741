//! History store abstraction for Itinera.
//!
//! Stores hold the append-only session logs. A session's state is never
//! stored directly; it is rebuilt by replaying its records.

mod memory;
mod sqlite;

pub use memory::MemoryHistoryStore;
pub use sqlite::SqliteHistoryStore;

use crate::config::Settings;
use crate::conversation::HistoryRecord;
use crate::error::{ItineraError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Summary information about a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    /// Number of history records.
    pub record_count: u64,
    /// Whether the log ends with a terminal record.
    pub terminal: bool,
    pub created_at: DateTime<Utc>,
    /// Time of the latest record, or creation time for an empty log.
    pub updated_at: DateTime<Utc>,
}

/// Trait for history store implementations.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Register a new, empty session.
    async fn create_session(&self, session_id: &str) -> Result<()>;

    /// Append records to a session's log.
    ///
    /// Records must continue the log: the first `turn_index` has to equal the
    /// current record count.
    async fn append(&self, session_id: &str, records: &[HistoryRecord]) -> Result<()>;

    /// Load a session's full log in order. Unknown sessions yield `None`.
    async fn load(&self, session_id: &str) -> Result<Option<Vec<HistoryRecord>>>;

    /// List stored sessions, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Delete a session and its log. Returns whether it existed.
    async fn delete(&self, session_id: &str) -> Result<bool>;
}

/// Create the configured store.
pub fn create_store(settings: &Settings) -> Result<Arc<dyn HistoryStore>> {
    match settings.store.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteHistoryStore::new(&settings.sqlite_path())?)),
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        other => Err(ItineraError::Config(format!("Unknown store provider: {}", other))),
    }
}

/// Ensure `records` continue a log currently holding `existing` entries.
pub(crate) fn check_continuation(session_id: &str, existing: u64, records: &[HistoryRecord]) -> Result<()> {
    for (offset, record) in records.iter().enumerate() {
        let expected = existing + offset as u64;
        if record.turn_index != expected {
            return Err(ItineraError::Session(format!(
                "Session {}: expected record {}, got {}",
                session_id, expected, record.turn_index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::agent::AgentId;
    use crate::conversation::ConversationState;
    use crate::conversation::{Action, HistoryRecord, TerminationCause};

    /// A short log: user message, a confirmation, then termination.
    pub fn sample_log(session_id: &str) -> Vec<HistoryRecord> {
        let mut state = ConversationState::new(session_id);
        state.add_user_message("plan a 3-night, 4-day Seoul trip").unwrap();
        state.confirm("create_share_page").unwrap();
        state
            .record(
                AgentId::Coordinator,
                Action::Terminated {
                    cause: TerminationCause::Requested,
                    message: "done".into(),
                },
            )
            .unwrap();
        state.history().to_vec()
    }
}
