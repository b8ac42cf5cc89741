//! Coordinator: routing, retry and termination policy.

use super::runtime::Runtime;
use super::{AgentDefinition, AgentId, RouteTarget};
use crate::conversation::{Action, ConversationState, TerminationCause, TransferReason};
use crate::error::{ItineraError, Result};
use crate::handoff::HandoffCommand;
use crate::model::{MessageRole, ModelMessage, StructuredOutput};
use tracing::{info, instrument, warn};

/// Message used when the coordinator runs out of attempts.
pub const APOLOGY: &str =
    "Sorry, I could not work out how to continue with this request. Here is what I have so far.";

/// What the coordinator decided. Every variant has already been recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Control was transferred to a worker.
    Handoff(AgentId),
    /// A question for the user; the run pauses until the next message.
    AwaitingUser(String),
    /// The session ended.
    Terminated(TerminationCause),
}

enum Verdict {
    Route(HandoffCommand),
    Ask(String),
    Terminate(String),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Coordinator;

impl Coordinator {
    pub fn new() -> Self {
        Self
    }

    /// Decide the next step from the current state.
    ///
    /// The model's answer is validated and checked against routing rules; an
    /// answer that fails either is recorded and the model is re-prompted with
    /// the reason, up to `coordinator_attempts` times. After that the session
    /// ends with an apology instead of an error.
    #[instrument(skip_all, fields(session = %state.session_id()))]
    pub async fn decide(&self, rt: &Runtime, state: &mut ConversationState) -> Result<Decision> {
        if state.is_terminal() {
            return Err(ItineraError::Session(format!(
                "Session {} is terminated",
                state.session_id()
            )));
        }
        if !state.active().is_coordinator() {
            return Err(ItineraError::Session(format!(
                "decide called while {} is active",
                state.active()
            )));
        }

        let me = rt.definition(AgentId::Coordinator)?;
        let mut messages = transcript(state);

        // After a loop escalation the only ways forward are the user or TERMINATE.
        let blocked = match state.last_escalation() {
            Some(TransferReason::LoopDetected { blocked_target, .. }) => {
                messages.push(ModelMessage::new(
                    MessageRole::Feedback,
                    rt.prompts.render_feedback(
                        &rt.prompts.feedback.loop_detected,
                        &[("agent", blocked_target.to_string())],
                    ),
                ));
                Some(*blocked_target)
            }
            _ => None,
        };

        let max = rt.limits.coordinator_attempts;
        for attempt in 1..=max {
            let mut request = rt.request(me, state, messages.clone());
            if blocked.is_some() {
                request.routes = vec![RouteTarget::Terminate];
            }
            let verdict = match rt.ask(&request).await {
                Ok((raw, output)) => self
                    .validate(rt, me, state, output, blocked)
                    .map(|v| (raw, v)),
                Err(e) => Err(e),
            };

            let error = match verdict {
                Ok((raw, verdict)) => {
                    state.record(me.id, Action::Decision { attempt, output: raw })?;
                    match verdict {
                        Verdict::Route(command) => match rt.protocol.transfer(state, command) {
                            Ok(to) => return Ok(Decision::Handoff(to)),
                            Err(e @ (ItineraError::Routing(_) | ItineraError::LoopGuard { .. })) => e,
                            Err(e) => return Err(e),
                        },
                        Verdict::Ask(question) => {
                            state.record(me.id, Action::AwaitingUser { question: question.clone() })?;
                            return Ok(Decision::AwaitingUser(question));
                        }
                        Verdict::Terminate(message) => {
                            info!("Coordinator terminated the session");
                            self.conclude(state, TerminationCause::Requested, &message)?;
                            return Ok(Decision::Terminated(TerminationCause::Requested));
                        }
                    }
                }
                Err(e) => e,
            };

            warn!("Coordinator output rejected ({}/{}): {}", attempt, max, error);
            state.record(
                me.id,
                Action::InvalidOutput {
                    attempt,
                    error: error.to_string(),
                },
            )?;
            messages.push(ModelMessage::new(
                MessageRole::Feedback,
                rt.prompts.render_feedback(
                    &rt.prompts.feedback.invalid_output,
                    &[
                        ("attempt", attempt.to_string()),
                        ("max_attempts", max.to_string()),
                        ("error", error.to_string()),
                    ],
                ),
            ));
        }

        self.conclude(state, TerminationCause::RetriesExhausted, APOLOGY)?;
        Ok(Decision::Terminated(TerminationCause::RetriesExhausted))
    }

    /// End the session. The coordinator must be active.
    pub fn conclude(&self, state: &mut ConversationState, cause: TerminationCause, message: &str) -> Result<()> {
        state.record(
            AgentId::Coordinator,
            Action::Terminated {
                cause,
                message: message.to_string(),
            },
        )?;
        Ok(())
    }

    fn validate(
        &self,
        rt: &Runtime,
        me: &AgentDefinition,
        state: &ConversationState,
        output: StructuredOutput,
        blocked: Option<AgentId>,
    ) -> Result<Verdict> {
        let (target, candidates, payload, reason) = match output {
            StructuredOutput::ToolCalls { .. } => {
                return Err(ItineraError::Routing(
                    "the coordinator has no tools; hand off to a worker instead".to_string(),
                ))
            }
            StructuredOutput::Completion { text, .. } => {
                if text.trim().is_empty() {
                    return Err(ItineraError::Routing("empty question for the user".to_string()));
                }
                return Ok(Verdict::Ask(text));
            }
            StructuredOutput::Handoff {
                target,
                candidates,
                payload,
                reason,
            } => (target, candidates, payload, reason),
        };

        let terminate = matches!(target, Some(RouteTarget::Terminate));
        if let (Some(looping), false) = (blocked, terminate) {
            return Err(ItineraError::Routing(format!(
                "handoffs are stopped after repeated transfers to {}; ask the user or TERMINATE",
                looping
            )));
        }

        let routable = |id: AgentId| -> Result<()> {
            if !rt.roster.is_enabled(id) || !me.may_address(id) {
                return Err(ItineraError::Routing(format!("{} is not a routable worker", id)));
            }
            let definition = rt.definition(id)?;
            if let Some(tool) = &definition.entry_confirmation {
                if !state.is_confirmed(tool) {
                    return Err(ItineraError::Routing(format!(
                        "{} needs the user's confirmation for {} first",
                        id, tool
                    )));
                }
            }
            Ok(())
        };

        let to = match target {
            Some(RouteTarget::Terminate) => {
                return Ok(Verdict::Terminate(
                    reason.unwrap_or_else(|| "Your request has been handled.".to_string()),
                ))
            }
            Some(RouteTarget::Agent(id)) => {
                routable(id)?;
                id
            }
            None if !candidates.is_empty() => {
                let usable: Vec<AgentId> = candidates.iter().copied().filter(|c| routable(*c).is_ok()).collect();
                me.pick_candidate(&usable).ok_or_else(|| {
                    ItineraError::Routing(format!("none of the candidates {:?} is routable", candidates))
                })?
            }
            None => {
                return Err(ItineraError::Routing(
                    "the coordinator must name a target or TERMINATE".to_string(),
                ))
            }
        };

        rt.protocol.guard().check(state, me.id, to)?;

        Ok(Verdict::Route(HandoffCommand::to(
            to,
            payload,
            TransferReason::Routed { note: reason },
        )))
    }
}

/// The conversation as the coordinator sees it.
fn transcript(state: &ConversationState) -> Vec<ModelMessage> {
    state
        .history()
        .iter()
        .filter_map(|record| match &record.action {
            Action::UserMessage { text } => Some(ModelMessage::new(MessageRole::User, text.clone())),
            Action::AwaitingUser { question } => {
                Some(ModelMessage::new(MessageRole::Assistant, question.clone()))
            }
            Action::Confirmation { tool } => Some(ModelMessage::new(
                MessageRole::Feedback,
                format!("The user confirmed {}.", tool),
            )),
            Action::Completion { text, .. } => Some(ModelMessage::new(
                MessageRole::Feedback,
                format!("{} completed: {}", record.agent, text),
            )),
            Action::Transfer {
                from,
                to,
                payload,
                reason,
            } if to.is_coordinator() => Some(ModelMessage::new(
                MessageRole::Feedback,
                format!("{} returned control ({}): {}", from, reason.label(), payload),
            )),
            _ => None,
        })
        .collect()
}
