//! Sessions: a conversation state bound to its stored log.
//!
//! A [`Session`] owns its [`ConversationState`] outright. The
//! [`SessionManager`] keeps one `tokio::sync::Mutex` per live session, so
//! concurrent requests against the same session run one after another while
//! different sessions proceed independently.

use crate::assembler::{assemble, FinalResponse};
use crate::conversation::{ConversationState, HistoryRecord};
use crate::error::{ItineraError, Result};
use crate::orchestrator::Orchestrator;
use crate::store::{HistoryStore, SessionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// One conversation and the part of its history already persisted.
pub struct Session {
    state: ConversationState,
    store: Arc<dyn HistoryStore>,
    persisted: usize,
}

impl Session {
    /// Register a new, empty session. A random id is used when none is given.
    pub async fn create(store: Arc<dyn HistoryStore>, session_id: Option<&str>) -> Result<Self> {
        let session_id = match session_id {
            Some(id) if id.trim().is_empty() => {
                return Err(ItineraError::InvalidInput("session id must not be empty".to_string()))
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if store.load(&session_id).await?.is_some() {
            return Err(ItineraError::InvalidInput(format!(
                "Session {} already exists",
                session_id
            )));
        }

        store.create_session(&session_id).await?;
        info!("Created session {}", session_id);
        Ok(Self {
            state: ConversationState::new(&session_id),
            store,
            persisted: 0,
        })
    }

    /// Rebuild a stored session by replaying its log.
    pub async fn open(store: Arc<dyn HistoryStore>, session_id: &str) -> Result<Self> {
        let records = store
            .load(session_id)
            .await?
            .ok_or_else(|| ItineraError::NotFound(format!("session {}", session_id)))?;
        let persisted = records.len();
        let state = ConversationState::replay(session_id, records)?;
        debug!("Replayed {} records for session {}", persisted, session_id);

        Ok(Self {
            state,
            store,
            persisted,
        })
    }

    /// Open a stored session, or create it if the id is unknown.
    pub async fn open_or_create(store: Arc<dyn HistoryStore>, session_id: &str) -> Result<Self> {
        match store.load(session_id).await? {
            Some(_) => Self::open(store, session_id).await,
            None => Self::create(store, Some(session_id)).await,
        }
    }

    pub fn id(&self) -> &str {
        self.state.session_id()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    /// Write records appended since the last flush.
    pub async fn flush(&mut self) -> Result<()> {
        let pending = &self.state.history()[self.persisted..];
        if pending.is_empty() {
            return Ok(());
        }
        self.store.append(self.state.session_id(), pending).await?;
        self.persisted = self.state.history().len();
        Ok(())
    }

    /// Record the user's confirmation for an irreversible tool and persist it.
    pub async fn confirm(&mut self, tool: &str) -> Result<()> {
        self.state.confirm(tool)?;
        self.flush().await
    }

    /// Records not yet written to the store.
    pub fn unflushed(&self) -> usize {
        self.state.history().len() - self.persisted
    }
}

/// Live sessions for long-running front ends (chat, HTTP API).
pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn HistoryStore>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            orchestrator,
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Start a new session and return its id.
    pub async fn create(&self, session_id: Option<&str>) -> Result<String> {
        let session = Session::create(self.store.clone(), session_id).await?;
        let id = session.id().to_string();
        self.sessions
            .lock()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// The session handle, loading it from the store on first use.
    pub async fn get(&self, session_id: &str) -> Result<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return Ok(session.clone());
        }

        let session = Arc::new(Mutex::new(Session::open(self.store.clone(), session_id).await?));
        sessions.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// Handle a user message in a session.
    ///
    /// A session that ends is dropped from memory; its log stays in the store
    /// and is replayed if the session is read again.
    #[instrument(skip(self, text))]
    pub async fn send(&self, session_id: &str, text: &str) -> Result<FinalResponse> {
        let handle = self.get(session_id).await?;
        let (response, finished) = {
            let mut session = handle.lock().await;
            let response = self.orchestrator.handle_message(&mut session, text).await?;
            (response, session.state().is_terminal())
        };
        if finished {
            self.evict(session_id, &handle).await;
        }
        Ok(response)
    }

    /// Sessions currently held in memory.
    pub async fn live_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn evict(&self, session_id: &str, handle: &Arc<Mutex<Session>>) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(session_id).is_some_and(|live| Arc::ptr_eq(live, handle)) {
            sessions.remove(session_id);
            debug!("Evicted terminated session {}", session_id);
        }
    }

    /// Record a confirmation and return the session's current response.
    pub async fn confirm(&self, session_id: &str, tool: &str) -> Result<FinalResponse> {
        if self.orchestrator.runtime().registry.spec(tool).is_none() {
            return Err(ItineraError::InvalidInput(format!("Unknown tool: {}", tool)));
        }
        let handle = self.get(session_id).await?;
        let mut session = handle.lock().await;
        session.confirm(tool).await?;
        Ok(assemble(session.state()))
    }

    /// The session's current response without running anything.
    pub async fn current(&self, session_id: &str) -> Result<FinalResponse> {
        let handle = self.get(session_id).await?;
        let session = handle.lock().await;
        Ok(assemble(session.state()))
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<HistoryRecord>> {
        let handle = self.get(session_id).await?;
        let session = handle.lock().await;
        Ok(session.state().history().to_vec())
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions().await
    }

    /// Forget a session and delete its log. Returns whether it existed.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.sessions.lock().await.remove(session_id);
        self.store.delete(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use crate::assembler::ResponseStatus;
    use crate::config::Settings;
    use crate::model::ScriptedModelProvider;
    use crate::store::{test_support, MemoryHistoryStore};
    use crate::tools::RecordingToolProvider;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> Arc<dyn HistoryStore> {
        Arc::new(MemoryHistoryStore::new())
    }

    #[tokio::test]
    async fn test_flush_persists_only_new_records() {
        let store = store();
        let mut session = Session::create(store.clone(), Some("s1")).await.unwrap();
        session.state_mut().add_user_message("hello").unwrap();
        assert_eq!(session.unflushed(), 1);
        assert_ok!(session.flush().await);
        assert_eq!(session.unflushed(), 0);
        assert_ok!(session.flush().await);

        session.confirm("create_share_page").await.unwrap();
        let stored = store.load("s1").await.unwrap().unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_open_replays_the_stored_log() {
        let store = store();
        let log = test_support::sample_log("s1");
        store.create_session("s1").await.unwrap();
        store.append("s1", &log).await.unwrap();

        let session = Session::open(store, "s1").await.unwrap();
        assert!(session.state().is_terminal());
        assert!(session.state().is_confirmed("create_share_page"));
        assert_eq!(session.unflushed(), 0);
    }

    #[tokio::test]
    async fn test_open_unknown_session() {
        let result = Session::open(store(), "missing").await;
        assert!(matches!(result, Err(ItineraError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_session_id_rejected() {
        let store = store();
        Session::create(store.clone(), Some("s1")).await.unwrap();
        let error = assert_err!(Session::create(store, Some("s1")).await.map(|s| s.persisted));
        assert!(matches!(error, ItineraError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_manager_runs_messages_and_confirmations() {
        let model = Arc::new(ScriptedModelProvider::new());
        model.push(AgentId::Coordinator, json!({"kind": "completion", "text": "Where to?"}));
        let orchestrator = Orchestrator::new(
            &Settings::default(),
            model,
            Arc::new(RecordingToolProvider::new()),
        )
        .unwrap();
        let manager = SessionManager::new(Arc::new(orchestrator), store());

        let id = manager.create(None).await.unwrap();
        let confirmed = manager.confirm(&id, "create_share_page").await.unwrap();
        assert_eq!(confirmed.status, ResponseStatus::InProgress);
        assert!(manager.confirm(&id, "book_flight").await.is_err());

        let response = manager.send(&id, "plan a trip").await.unwrap();
        assert_eq!(response.status, ResponseStatus::AwaitingUser);
        assert_eq!(manager.history(&id).await.unwrap().len(), 4);
        assert_eq!(manager.list().await.unwrap()[0].record_count, 4);

        assert!(manager.delete(&id).await.unwrap());
        assert!(matches!(manager.current(&id).await, Err(ItineraError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_terminated_session_is_evicted() {
        let model = Arc::new(ScriptedModelProvider::new());
        model.push(AgentId::Coordinator, json!({"kind": "completion", "text": "Which city?"}));
        model.push(
            AgentId::Coordinator,
            json!({"kind": "handoff", "target": "TERMINATE", "reason": "Nothing to plan."}),
        );
        let orchestrator = Orchestrator::new(
            &Settings::default(),
            model,
            Arc::new(RecordingToolProvider::new()),
        )
        .unwrap();
        let manager = SessionManager::new(Arc::new(orchestrator), store());

        let id = manager.create(None).await.unwrap();
        manager.send(&id, "plan a trip").await.unwrap();
        assert_eq!(manager.live_sessions().await, 1);

        let last = manager.send(&id, "never mind").await.unwrap();
        assert_eq!(last.status, ResponseStatus::Complete);
        assert_eq!(manager.live_sessions().await, 0);

        let reloaded = manager.current(&id).await.unwrap();
        assert_eq!(reloaded, last);
        assert!(matches!(
            manager.send(&id, "one more thing").await,
            Err(ItineraError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_session_id_rejected() {
        let result = Session::create(store(), Some("  ")).await;
        assert!(matches!(result, Err(ItineraError::InvalidInput(_))));
    }
}
