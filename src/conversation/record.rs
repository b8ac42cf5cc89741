//! History log records.

use crate::agent::AgentId;
use crate::tools::{Artifact, ToolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the append-only session log.
///
/// Serialises as `{turn_index, agent, action_kind, payload, recorded_at}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Position of the record in the log, starting at zero.
    pub turn_index: u64,
    /// Agent that produced the record.
    pub agent: AgentId,
    #[serde(flatten)]
    pub action: Action,
    pub recorded_at: DateTime<Utc>,
}

/// What happened, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_kind", content = "payload", rename_all = "snake_case")]
pub enum Action {
    /// Input from the user; resumes the session at the coordinator.
    UserMessage { text: String },
    /// The user confirmed an irreversible tool for this session.
    Confirmation { tool: String },
    /// A structured output accepted from the model.
    Decision { attempt: u32, output: Value },
    /// A model output that was rejected; the agent re-prompts or escalates.
    InvalidOutput { attempt: u32, error: String },
    ToolCall {
        call_id: Option<String>,
        tool: String,
        arguments: Value,
    },
    ToolResult {
        call_id: Option<String>,
        tool: String,
        artifact: Artifact,
        output: Value,
    },
    /// External failure reported by the provider.
    ToolFailed {
        call_id: Option<String>,
        tool: String,
        attempt: u32,
        error: ToolError,
    },
    /// Refused at dispatch without reaching the provider.
    ToolRejected {
        call_id: Option<String>,
        tool: String,
        error_kind: String,
        message: String,
    },
    /// Atomic control transfer.
    Transfer {
        from: AgentId,
        to: AgentId,
        payload: Value,
        reason: TransferReason,
    },
    /// The coordinator asked the user a question; the run pauses.
    AwaitingUser { question: String },
    /// A worker finished its task.
    Completion { text: String, payload: Value },
    /// The in-flight call was aborted by the session deadline.
    Cancelled { during: String },
    /// The session ended. Nothing may be appended afterwards.
    Terminated {
        cause: TerminationCause,
        message: String,
    },
}

impl Action {
    /// Wire name of the variant, as stored in `action_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::UserMessage { .. } => "user_message",
            Action::Confirmation { .. } => "confirmation",
            Action::Decision { .. } => "decision",
            Action::InvalidOutput { .. } => "invalid_output",
            Action::ToolCall { .. } => "tool_call",
            Action::ToolResult { .. } => "tool_result",
            Action::ToolFailed { .. } => "tool_failed",
            Action::ToolRejected { .. } => "tool_rejected",
            Action::Transfer { .. } => "transfer",
            Action::AwaitingUser { .. } => "awaiting_user",
            Action::Completion { .. } => "completion",
            Action::Cancelled { .. } => "cancelled",
            Action::Terminated { .. } => "terminated",
        }
    }
}

/// Why control moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferReason {
    /// Target chosen by the agent's structured output.
    Routed { note: Option<String> },
    /// No target given; the agent's default next step was used.
    DefaultNext,
    /// A non-terminal worker completed and returns its result.
    Returning,
    /// The worker hit its tool-call budget for this turn.
    BudgetExceeded { budget: usize },
    /// A handoff was blocked by the loop guard.
    LoopDetected {
        blocked_target: AgentId,
        blocked_payload: Value,
        occurrences: usize,
        window: usize,
    },
    /// An action was refused for lack of permission or confirmation.
    PermissionDenied { tool: String, message: String },
    /// The worker kept producing invalid output.
    MalformedOutput { attempts: u32 },
    /// The session deadline expired while this agent was active.
    Timeout,
    /// A routing, tool or schema error escaped the agent's own recovery.
    Unrecovered { error: String },
}

impl TransferReason {
    pub fn label(&self) -> &'static str {
        match self {
            TransferReason::Routed { .. } => "routed",
            TransferReason::DefaultNext => "default_next",
            TransferReason::Returning => "returning",
            TransferReason::BudgetExceeded { .. } => "budget_exceeded",
            TransferReason::LoopDetected { .. } => "loop_detected",
            TransferReason::PermissionDenied { .. } => "permission_denied",
            TransferReason::MalformedOutput { .. } => "malformed_output",
            TransferReason::Timeout => "timeout",
            TransferReason::Unrecovered { .. } => "unrecovered",
        }
    }

    /// Whether this transfer signals a failure the coordinator must handle.
    pub fn is_escalation(&self) -> bool {
        !matches!(
            self,
            TransferReason::Routed { .. } | TransferReason::DefaultNext | TransferReason::Returning
        )
    }
}

/// How a session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// The coordinator issued `TERMINATE`.
    Requested,
    /// A terminal worker completed.
    Completed,
    /// The coordinator ran out of attempts to produce a valid decision.
    RetriesExhausted,
    /// The session deadline expired.
    Timeout,
    /// The run exceeded its transition bound.
    TransitionLimit,
}

impl TerminationCause {
    /// Whether the session ended on a failure path.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TerminationCause::Requested | TerminationCause::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_shape() {
        let record = HistoryRecord {
            turn_index: 3,
            agent: AgentId::Planner,
            action: Action::Transfer {
                from: AgentId::Planner,
                to: AgentId::LocationSearch,
                payload: json!({"destination": "Seoul"}),
                reason: TransferReason::DefaultNext,
            },
            recorded_at: Utc::now(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["turn_index"], 3);
        assert_eq!(value["agent"], "planner");
        assert_eq!(value["action_kind"], "transfer");
        assert_eq!(value["payload"]["to"], "location_search");
        assert_eq!(value["payload"]["reason"]["kind"], "default_next");

        let back: HistoryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let action = Action::ToolRejected {
            call_id: None,
            tool: "create_calendar_event".into(),
            error_kind: "permission".into(),
            message: "no confirmation".into(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action_kind"], action.kind());
    }

    #[test]
    fn test_escalation_reasons() {
        assert!(!TransferReason::DefaultNext.is_escalation());
        assert!(TransferReason::Timeout.is_escalation());
        assert!(TransferReason::Unrecovered { error: "x".into() }.is_escalation());
        assert!(TransferReason::BudgetExceeded { budget: 5 }.is_escalation());
        assert!(TerminationCause::RetriesExhausted.is_failure());
        assert!(!TerminationCause::Completed.is_failure());
    }
}
