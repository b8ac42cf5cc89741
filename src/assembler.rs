//! Final response assembly.
//!
//! The assembler only reads the state. It never calls a model or a tool, so
//! the same history always assembles to the same response.

use crate::conversation::{Action, ConversationState, TerminationCause, TransferReason};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

/// Overall outcome shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The request was handled end to end.
    Complete,
    /// The session ended early; partial artifacts are included.
    Incomplete,
    /// The coordinator could not produce a usable decision.
    Apology,
    /// The coordinator is waiting for an answer from the user.
    AwaitingUser,
    /// The run stopped without reaching a pause or terminal point.
    InProgress,
}

/// User-facing result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub session_id: String,
    pub status: ResponseStatus,
    pub message: String,
    pub itinerary: Option<Value>,
    pub places: Vec<Value>,
    pub search_results: Vec<Value>,
    /// Plan validation reports, oldest first.
    pub validations: Vec<Value>,
    pub calendar_events: Vec<Value>,
    pub share_links: Vec<String>,
    /// Irreversible tools the user has confirmed.
    pub confirmations: Vec<String>,
    /// Honest account of anything that did not happen.
    pub notices: Vec<String>,
}

impl FinalResponse {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ResponseStatus::AwaitingUser | ResponseStatus::InProgress)
    }

    /// Plain-text rendering for terminals and logs.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.message);

        if let Some(itinerary) = &self.itinerary {
            let _ = writeln!(out, "\nItinerary:");
            match itinerary.get("itinerary").and_then(Value::as_array) {
                Some(days) => {
                    for day in days {
                        let label = match day["date"].as_str() {
                            Some(date) => format!("Day {} ({})", day["day"], date),
                            None => format!("Day {}", day["day"]),
                        };
                        let _ = writeln!(out, "  {}", label);
                        for activity in day["activities"].as_array().into_iter().flatten() {
                            let _ = writeln!(
                                out,
                                "    {} {}",
                                activity["time"].as_str().unwrap_or("--:--"),
                                activity["activity"].as_str().unwrap_or_default()
                            );
                        }
                    }
                }
                None => {
                    let _ = writeln!(out, "  {}", itinerary);
                }
            }
        }

        if !self.places.is_empty() {
            let _ = writeln!(out, "\nPlaces:");
            for place in &self.places {
                let name = place["name"]
                    .as_str()
                    .or_else(|| place["place_name"].as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| place.to_string());
                let _ = writeln!(out, "  - {}", name);
            }
        }

        if !self.search_results.is_empty() {
            let _ = writeln!(out, "\nSearch results:");
            for hit in &self.search_results {
                let title = hit["title"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| hit.to_string());
                match hit["url"].as_str() {
                    Some(url) => {
                        let _ = writeln!(out, "  - {} <{}>", title, url);
                    }
                    None => {
                        let _ = writeln!(out, "  - {}", title);
                    }
                }
            }
        }

        if let Some(report) = self.validations.last() {
            let issues: Vec<&str> = report["issues"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect();
            if report["valid"].as_bool() == Some(true) {
                let _ = writeln!(out, "\nPlan check: passed");
            } else {
                let _ = writeln!(out, "\nPlan check: {}", issues.join("; "));
            }
        }

        if !self.calendar_events.is_empty() {
            let _ = writeln!(out, "\nCalendar events created: {}", self.calendar_events.len());
        }

        if !self.confirmations.is_empty() {
            let _ = writeln!(out, "\nConfirmed: {}", self.confirmations.join(", "));
        }

        for link in &self.share_links {
            let _ = writeln!(out, "\nShare link: {}", link);
        }

        if !self.notices.is_empty() {
            let _ = writeln!(out, "\nNotes:");
            for notice in &self.notices {
                let _ = writeln!(out, "  ! {}", notice);
            }
        }

        out
    }
}

/// Fold the state into a response.
pub fn assemble(state: &ConversationState) -> FinalResponse {
    let context = state.context();

    let (status, message) = match (state.termination(), state.awaiting_user()) {
        (Some((cause, message)), _) => {
            let status = match cause {
                TerminationCause::Requested | TerminationCause::Completed => ResponseStatus::Complete,
                TerminationCause::RetriesExhausted => ResponseStatus::Apology,
                TerminationCause::Timeout | TerminationCause::TransitionLimit => ResponseStatus::Incomplete,
            };
            (status, message.to_string())
        }
        (None, Some(question)) => (ResponseStatus::AwaitingUser, question.to_string()),
        (None, None) => (
            ResponseStatus::InProgress,
            "The request is still being processed.".to_string(),
        ),
    };

    let mut notices = Vec::new();
    if matches!(
        status,
        ResponseStatus::Incomplete | ResponseStatus::Apology | ResponseStatus::InProgress
    ) {
        notices.push("This result is incomplete; it contains only what was finished.".to_string());
    }
    notices.extend(turn_notices(state));
    dedup_in_order(&mut notices);

    FinalResponse {
        session_id: state.session_id().to_string(),
        status,
        message,
        itinerary: context.itinerary.clone(),
        places: context.places.clone(),
        search_results: context.search_results.clone(),
        validations: context.validations.clone(),
        calendar_events: context.calendar_events.clone(),
        share_links: context.share_links.clone(),
        confirmations: state.confirmations().map(str::to_string).collect(),
        notices,
    }
}

/// Failures recorded since the latest user message.
fn turn_notices(state: &ConversationState) -> Vec<String> {
    let turn = state.current_turn();
    let mut notices = Vec::new();

    for (i, record) in turn.iter().enumerate() {
        match &record.action {
            Action::ToolRejected { tool, message, .. } => {
                notices.push(format!("{} was not run: {}", tool, message));
            }
            Action::ToolFailed {
                call_id, tool, error, ..
            } => {
                let recovered = turn[i + 1..].iter().any(|later| {
                    matches!(&later.action, Action::ToolResult { call_id: c, tool: t, .. } if c == call_id && t == tool)
                        || matches!(&later.action, Action::ToolFailed { call_id: c, tool: t, .. } if c == call_id && t == tool)
                });
                if !recovered {
                    notices.push(format!("{} failed: {}", tool, error));
                }
            }
            Action::Cancelled { during } => {
                notices.push(format!("Stopped waiting for {}: the session deadline expired.", during));
            }
            Action::Transfer { from, reason, .. } => match reason {
                TransferReason::BudgetExceeded { budget } => {
                    notices.push(format!("{} stopped after {} tool rounds.", from, budget));
                }
                TransferReason::MalformedOutput { attempts } => {
                    notices.push(format!("{} gave no usable answer after {} attempts.", from, attempts));
                }
                TransferReason::LoopDetected { blocked_target, .. } => {
                    notices.push(format!("Stopped repeated handoffs to {}.", blocked_target));
                }
                TransferReason::PermissionDenied { tool, .. } => {
                    notices.push(format!("{} needs your confirmation before it can run.", tool));
                }
                TransferReason::Unrecovered { error } => {
                    notices.push(format!("{} hit an error it could not recover from: {}", from, error));
                }
                _ => {}
            },
            _ => {}
        }
    }

    notices
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
