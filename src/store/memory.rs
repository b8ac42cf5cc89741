//! In-memory history store implementation.
//!
//! Useful for testing and the HTTP server's ephemeral mode.

use super::{check_continuation, HistoryStore, SessionSummary};
use crate::conversation::{Action, HistoryRecord};
use crate::error::{ItineraError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

struct StoredSession {
    created_at: DateTime<Utc>,
    records: Vec<HistoryRecord>,
}

/// In-memory history store.
pub struct MemoryHistoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl MemoryHistoryStore {
    /// Create a new in-memory history store.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ItineraError {
    ItineraError::Session("History store lock poisoned".to_string())
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| StoredSession {
                created_at: Utc::now(),
                records: Vec::new(),
            });
        Ok(())
    }

    async fn append(&self, session_id: &str, records: &[HistoryRecord]) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ItineraError::Session(format!("Unknown session: {}", session_id)))?;

        check_continuation(session_id, session.records.len() as u64, records)?;
        session.records.extend_from_slice(records);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Vec<HistoryRecord>>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.get(session_id).map(|s| s.records.clone()))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;

        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, session)| SessionSummary {
                session_id: id.clone(),
                record_count: session.records.len() as u64,
                terminal: session
                    .records
                    .iter()
                    .any(|r| matches!(r.action, Action::Terminated { .. })),
                created_at: session.created_at,
                updated_at: session
                    .records
                    .last()
                    .map_or(session.created_at, |r| r.recorded_at),
            })
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        Ok(sessions.remove(session_id).is_some())
    }
}
