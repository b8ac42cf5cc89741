//! Conversation state and its append-only history.
//!
//! [`ConversationState`] is never edited field by field. Every change is a
//! [`HistoryRecord`] passed to [`ConversationState::append`], which checks it
//! against the current state and folds it in. Replaying a stored log through
//! the same method therefore rebuilds exactly the state the live run had.

mod record;
mod task;

pub use record::{Action, HistoryRecord, TerminationCause, TransferReason};
pub use task::TaskContext;

use crate::agent::AgentId;
use crate::error::{ItineraError, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};

/// Activations kept on the visited stack; loop-guard windows must fit in it.
pub const VISITED_CAPACITY: usize = 32;

/// State of one session, exclusively owned by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationState {
    session_id: String,
    history: Vec<HistoryRecord>,
    active: AgentId,
    context: TaskContext,
    visited: VecDeque<AgentId>,
    inbox: Value,
    confirmations: BTreeSet<String>,
    awaiting_user: Option<String>,
    terminal: bool,
    termination: Option<(TerminationCause, String)>,
    /// Index of the latest user message in `history`.
    turn_start: usize,
}

impl ConversationState {
    /// Fresh state: coordinator active, nothing recorded.
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            history: Vec::new(),
            active: AgentId::Coordinator,
            context: TaskContext::default(),
            visited: VecDeque::new(),
            inbox: Value::Null,
            confirmations: BTreeSet::new(),
            awaiting_user: None,
            terminal: false,
            termination: None,
            turn_start: 0,
        }
    }

    /// Rebuild a state by applying `records` in order from empty.
    pub fn replay<I>(session_id: &str, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = HistoryRecord>,
    {
        let mut state = Self::new(session_id);
        for record in records {
            state.append(record)?;
        }
        Ok(state)
    }

    /// Append a record and apply it.
    ///
    /// Rejects records after the terminal one, out-of-order indices, records
    /// attributed to an agent that is not active, and transfers that do not
    /// start from the active agent. A rejected record leaves the state as it
    /// was.
    pub fn append(&mut self, record: HistoryRecord) -> Result<()> {
        if self.terminal {
            return Err(ItineraError::Session(format!(
                "Session {} is terminated; refusing {}",
                self.session_id,
                record.action.kind()
            )));
        }
        if record.turn_index != self.history.len() as u64 {
            return Err(ItineraError::Session(format!(
                "Out-of-order record: expected turn {}, got {}",
                self.history.len(),
                record.turn_index
            )));
        }

        match &record.action {
            Action::UserMessage { .. } | Action::Confirmation { .. } => {}
            Action::Transfer { from, .. } if *from != self.active || record.agent != self.active => {
                return Err(ItineraError::Session(format!(
                    "Transfer from {} while {} is active",
                    from, self.active
                )));
            }
            _ if record.agent != self.active => {
                return Err(ItineraError::Session(format!(
                    "{} recorded by {} while {} is active",
                    record.action.kind(),
                    record.agent,
                    self.active
                )));
            }
            _ => {}
        }

        self.apply(&record.action);
        self.history.push(record);
        Ok(())
    }

    /// Build the next record for `agent` and append it.
    pub fn record(&mut self, agent: AgentId, action: Action) -> Result<&HistoryRecord> {
        let record = HistoryRecord {
            turn_index: self.history.len() as u64,
            agent,
            action,
            recorded_at: Utc::now(),
        };
        self.append(record)?;
        self.history
            .last()
            .ok_or_else(|| ItineraError::Session("History unexpectedly empty".to_string()))
    }

    /// Record a user message; the coordinator takes over.
    pub fn add_user_message(&mut self, text: &str) -> Result<()> {
        self.record(
            AgentId::Coordinator,
            Action::UserMessage {
                text: text.to_string(),
            },
        )?;
        Ok(())
    }

    /// Record the user's confirmation for an irreversible tool.
    pub fn confirm(&mut self, tool: &str) -> Result<()> {
        self.record(
            AgentId::Coordinator,
            Action::Confirmation {
                tool: tool.to_string(),
            },
        )?;
        Ok(())
    }

    fn apply(&mut self, action: &Action) {
        match action {
            Action::UserMessage { text } => {
                self.context.request = Some(text.clone());
                self.active = AgentId::Coordinator;
                self.inbox = serde_json::json!({ "message": text });
                self.awaiting_user = None;
                self.visited.clear();
                self.turn_start = self.history.len();
            }
            Action::Confirmation { tool } => {
                self.confirmations.insert(tool.clone());
            }
            Action::ToolResult { artifact, output, .. } => {
                self.context.absorb_tool_output(*artifact, output);
            }
            Action::Transfer { to, payload, .. } => {
                self.active = *to;
                self.inbox = payload.clone();
                self.context.absorb_payload(payload);
                if self.visited.len() == VISITED_CAPACITY {
                    self.visited.pop_front();
                }
                self.visited.push_back(*to);
            }
            Action::AwaitingUser { question } => {
                self.awaiting_user = Some(question.clone());
            }
            Action::Completion { text, payload } => {
                self.context.absorb_payload(payload);
                if !text.is_empty() {
                    self.context.notes.push(text.clone());
                }
            }
            Action::Terminated { cause, message } => {
                self.terminal = true;
                self.termination = Some((*cause, message.clone()));
            }
            Action::Decision { .. }
            | Action::InvalidOutput { .. }
            | Action::ToolCall { .. }
            | Action::ToolFailed { .. }
            | Action::ToolRejected { .. }
            | Action::Cancelled { .. } => {}
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Records since (and including) the latest user message.
    pub fn current_turn(&self) -> &[HistoryRecord] {
        &self.history[self.turn_start.min(self.history.len())..]
    }

    pub fn active(&self) -> AgentId {
        self.active
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Payload handed to the active agent by the last transfer.
    pub fn inbox(&self) -> &Value {
        &self.inbox
    }

    /// The last `window` activations, oldest first.
    pub fn recent_visits(&self, window: usize) -> Vec<AgentId> {
        let skip = self.visited.len().saturating_sub(window);
        self.visited.iter().skip(skip).copied().collect()
    }

    /// Length of the run of `agent` at the top of the visited stack.
    pub fn trailing_run(&self, agent: AgentId) -> usize {
        self.visited.iter().rev().take_while(|a| **a == agent).count()
    }

    pub fn is_confirmed(&self, tool: &str) -> bool {
        self.confirmations.contains(tool)
    }

    pub fn confirmations(&self) -> impl Iterator<Item = &str> {
        self.confirmations.iter().map(String::as_str)
    }

    pub fn awaiting_user(&self) -> Option<&str> {
        self.awaiting_user.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn termination(&self) -> Option<(TerminationCause, &str)> {
        self.termination.as_ref().map(|(c, m)| (*c, m.as_str()))
    }

    /// The most recent escalation to the coordinator in the current turn.
    pub fn last_escalation(&self) -> Option<&TransferReason> {
        self.current_turn().iter().rev().find_map(|r| match &r.action {
            Action::Transfer { to, reason, .. } if to.is_coordinator() && reason.is_escalation() => {
                Some(reason)
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Artifact;
    use serde_json::json;

    fn transfer(state: &mut ConversationState, to: AgentId, payload: Value) {
        let from = state.active();
        state
            .record(
                from,
                Action::Transfer {
                    from,
                    to,
                    payload,
                    reason: TransferReason::DefaultNext,
                },
            )
            .unwrap();
    }

    fn sample_state() -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.add_user_message("plan a 3-night, 4-day Seoul trip").unwrap();
        transfer(&mut state, AgentId::Planner, json!({"destination": "Seoul"}));
        state
            .record(
                AgentId::Planner,
                Action::ToolResult {
                    call_id: None,
                    tool: "create_travel_plan".into(),
                    artifact: Artifact::Itinerary,
                    output: json!({"destination": "Seoul", "duration": 4}),
                },
            )
            .unwrap();
        transfer(&mut state, AgentId::LocationSearch, json!({}));
        state
            .record(
                AgentId::LocationSearch,
                Action::ToolResult {
                    call_id: Some("c1".into()),
                    tool: "search_places".into(),
                    artifact: Artifact::Places,
                    output: json!({"places": [{"name": "Gyeongbokgung"}]}),
                },
            )
            .unwrap();
        transfer(&mut state, AgentId::Coordinator, json!({}));
        state.confirm("create_share_page").unwrap();
        state
    }

    #[test]
    fn test_new_state_has_coordinator_active() {
        let state = ConversationState::new("s1");
        assert_eq!(state.active(), AgentId::Coordinator);
        assert!(!state.is_terminal());
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_transfer_moves_active_pointer_and_payload() {
        let state = sample_state();
        assert_eq!(state.active(), AgentId::Coordinator);
        assert_eq!(
            state.recent_visits(6),
            vec![AgentId::Planner, AgentId::LocationSearch, AgentId::Coordinator]
        );
        assert!(state.context().has_itinerary());
        assert_eq!(state.context().places.len(), 1);
        assert!(state.is_confirmed("create_share_page"));
    }

    #[test]
    fn test_replay_reproduces_state() {
        let live = sample_state();
        let replayed = ConversationState::replay("s1", live.history().to_vec()).unwrap();
        assert_eq!(replayed, live);
    }

    #[test]
    fn test_replay_from_any_prefix() {
        let live = sample_state();
        let records = live.history().to_vec();

        for split in 0..=records.len() {
            let mut state = ConversationState::replay("s1", records[..split].to_vec()).unwrap();
            for record in records[split..].iter().cloned() {
                state.append(record).unwrap();
            }
            assert_eq!(state, live, "diverged when splitting at {}", split);
        }
    }

    #[test]
    fn test_terminal_flag_is_monotonic() {
        let mut state = sample_state();
        state
            .record(
                AgentId::Coordinator,
                Action::Terminated {
                    cause: TerminationCause::Requested,
                    message: "done".into(),
                },
            )
            .unwrap();
        assert!(state.is_terminal());

        let before = state.clone();
        assert!(state.add_user_message("one more thing").is_err());
        assert!(state.confirm("create_calendar_event").is_err());
        assert!(state.is_terminal());
        assert_eq!(state, before);
    }

    #[test]
    fn test_append_rejects_out_of_order_and_foreign_records() {
        let mut state = sample_state();
        let len = state.history().len();

        let mut stale = state.history()[0].clone();
        assert!(state.append(stale.clone()).is_err());

        stale.turn_index = len as u64;
        stale.agent = AgentId::Planner;
        stale.action = Action::Cancelled {
            during: "model".into(),
        };
        assert!(state.append(stale).is_err());

        let bad_transfer = HistoryRecord {
            turn_index: len as u64,
            agent: AgentId::Planner,
            action: Action::Transfer {
                from: AgentId::Planner,
                to: AgentId::Share,
                payload: json!({}),
                reason: TransferReason::DefaultNext,
            },
            recorded_at: Utc::now(),
        };
        assert!(state.append(bad_transfer).is_err());
        assert_eq!(state.history().len(), len);
        assert_eq!(state.active(), AgentId::Coordinator);
    }

    #[test]
    fn test_user_message_starts_new_turn() {
        let mut state = sample_state();
        state
            .record(
                AgentId::Coordinator,
                Action::AwaitingUser {
                    question: "Which dates?".into(),
                },
            )
            .unwrap();
        assert_eq!(state.awaiting_user(), Some("Which dates?"));

        state.add_user_message("November 1st").unwrap();
        assert_eq!(state.awaiting_user(), None);
        assert!(state.recent_visits(6).is_empty());
        assert_eq!(state.current_turn().len(), 1);
        assert_eq!(state.inbox()["message"], "November 1st");
    }

    #[test]
    fn test_visited_stack_is_bounded() {
        let mut state = ConversationState::new("s1");
        state.add_user_message("hi").unwrap();
        for _ in 0..VISITED_CAPACITY {
            transfer(&mut state, AgentId::Planner, json!({}));
            transfer(&mut state, AgentId::Coordinator, json!({}));
        }
        assert_eq!(state.recent_visits(usize::MAX).len(), VISITED_CAPACITY);
        assert_eq!(state.trailing_run(AgentId::Coordinator), 1);
    }

    #[test]
    fn test_last_escalation() {
        let mut state = sample_state();
        assert!(state.last_escalation().is_none());

        transfer(&mut state, AgentId::Planner, json!({}));
        state
            .record(
                AgentId::Planner,
                Action::Transfer {
                    from: AgentId::Planner,
                    to: AgentId::Coordinator,
                    payload: json!({}),
                    reason: TransferReason::BudgetExceeded { budget: 5 },
                },
            )
            .unwrap();
        assert_eq!(
            state.last_escalation(),
            Some(&TransferReason::BudgetExceeded { budget: 5 })
        );
    }
}
