//! Generic worker state machine.
//!
//! One activation runs `Idle -> Executing -> {ToolCall}* -> Returning`:
//! the worker asks the model, dispatches tool calls in bounded rounds, and
//! leaves through exactly one transfer or a terminal completion.

use super::runtime::Runtime;
use super::{AgentDefinition, AgentId, RouteTarget};
use crate::conversation::{Action, ConversationState, TransferReason};
use crate::error::{ItineraError, Result};
use crate::handoff::HandoffCommand;
use crate::model::{MessageRole, ModelMessage, StructuredOutput};
use crate::tools::{ToolCallRequest, ToolError, ToolOutput};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

/// How a worker activation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Control moved to another agent.
    HandedOff(AgentId),
    /// Control was forced back to the coordinator.
    Escalated(TransferReason),
    /// A terminal worker completed; the session should end.
    Completed { text: String },
}

/// Result of one dispatched call, including retried failures.
struct CallOutcome {
    failures: Vec<ToolError>,
    result: Result<ToolOutput>,
}

/// Runs whichever worker is active. Stateless between activations.
#[derive(Debug, Default, Clone, Copy)]
pub struct Worker;

impl Worker {
    pub fn new() -> Self {
        Self
    }

    /// Run the active worker until it hands off, escalates or completes.
    #[instrument(skip_all, fields(agent = %state.active()))]
    pub async fn run(&self, rt: &Runtime, state: &mut ConversationState) -> Result<WorkerOutcome> {
        let agent = rt.definition(state.active())?;
        if agent.id.is_coordinator() {
            return Err(ItineraError::Session("the coordinator is not a worker".to_string()));
        }

        let mut messages = vec![ModelMessage::new(
            MessageRole::User,
            format!(
                "Request: {}\nIncoming payload: {}",
                state.context().request.as_deref().unwrap_or_default(),
                state.inbox()
            ),
        )];
        let mut invalid = 0u32;
        let mut rounds = 0usize;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = rt.request(agent, state, messages.clone());

            let accepted = match rt.ask(&request).await {
                Ok((raw, output)) => self.resolve(rt, agent, output).map(|step| (raw, step)),
                Err(e) => Err(e),
            };
            let (raw, step) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    invalid += 1;
                    match self.reject(rt, agent, state, invalid, &e, &mut messages)? {
                        Some(outcome) => return Ok(outcome),
                        None => continue,
                    }
                }
            };

            state.record(
                agent.id,
                Action::Decision {
                    attempt,
                    output: raw.clone(),
                },
            )?;

            match step {
                Step::Tools(calls) => {
                    if rounds >= rt.limits.worker_tool_budget {
                        let reason = TransferReason::BudgetExceeded {
                            budget: rt.limits.worker_tool_budget,
                        };
                        rt.protocol.escalate(state, json!({}), reason.clone())?;
                        return Ok(WorkerOutcome::Escalated(reason));
                    }
                    rounds += 1;
                    messages.push(ModelMessage::new(MessageRole::Assistant, raw.to_string()));

                    match self.dispatch(rt, agent, state, &calls).await? {
                        Dispatched::Fed(feedback) => messages.extend(feedback),
                        Dispatched::Denied { tool, message } => {
                            let reason = TransferReason::PermissionDenied { tool, message };
                            rt.protocol.escalate(state, json!({}), reason.clone())?;
                            return Ok(WorkerOutcome::Escalated(reason));
                        }
                    }
                }
                Step::Handoff(command) => match rt.protocol.transfer_or_escalate(state, command) {
                    Ok(to) => return Ok(handoff_outcome(state, to)),
                    Err(e @ ItineraError::Routing(_)) => {
                        invalid += 1;
                        if let Some(outcome) = self.reject(rt, agent, state, invalid, &e, &mut messages)? {
                            return Ok(outcome);
                        }
                    }
                    Err(e) => return Err(e),
                },
                Step::Complete { text, payload } => {
                    state.record(
                        agent.id,
                        Action::Completion {
                            text: text.clone(),
                            payload: payload.clone(),
                        },
                    )?;
                    if agent.terminal {
                        info!("{} completed the session", agent.id);
                        return Ok(WorkerOutcome::Completed { text });
                    }
                    rt.protocol.transfer(
                        state,
                        HandoffCommand::to(AgentId::Coordinator, payload, TransferReason::Returning),
                    )?;
                    return Ok(WorkerOutcome::HandedOff(AgentId::Coordinator));
                }
            }
        }
    }

    /// Record an invalid output. Escalates once the attempt bound is reached,
    /// otherwise queues feedback for the next attempt.
    fn reject(
        &self,
        rt: &Runtime,
        agent: &AgentDefinition,
        state: &mut ConversationState,
        invalid: u32,
        error: &ItineraError,
        messages: &mut Vec<ModelMessage>,
    ) -> Result<Option<WorkerOutcome>> {
        let max = rt.limits.worker_output_attempts;
        warn!("{} produced invalid output ({}/{}): {}", agent.id, invalid, max, error);
        state.record(
            agent.id,
            Action::InvalidOutput {
                attempt: invalid,
                error: error.to_string(),
            },
        )?;

        if invalid >= max {
            let reason = TransferReason::MalformedOutput { attempts: invalid };
            rt.protocol
                .escalate(state, json!({ "error": error.to_string() }), reason.clone())?;
            return Ok(Some(WorkerOutcome::Escalated(reason)));
        }

        messages.push(ModelMessage::new(
            MessageRole::Feedback,
            rt.prompts.render_feedback(
                &rt.prompts.feedback.invalid_output,
                &[
                    ("attempt", invalid.to_string()),
                    ("max_attempts", max.to_string()),
                    ("error", error.to_string()),
                ],
            ),
        ));
        Ok(None)
    }

    /// Turn a validated output into a step, resolving the handoff target.
    ///
    /// Order: explicit target, then the highest-priority permitted candidate,
    /// then the agent's default next step. An unusable target is a routing
    /// error, retried like malformed output.
    fn resolve(&self, rt: &Runtime, agent: &AgentDefinition, output: StructuredOutput) -> Result<Step> {
        match output {
            StructuredOutput::ToolCalls { calls } => Ok(Step::Tools(calls)),
            StructuredOutput::Completion { text, payload } => Ok(Step::Complete { text, payload }),
            StructuredOutput::Handoff {
                target,
                candidates,
                payload,
                reason,
            } => {
                let (to, why) = match target {
                    Some(RouteTarget::Terminate) => {
                        return Err(ItineraError::Routing(format!(
                            "{} may not issue TERMINATE; hand off to the coordinator instead",
                            agent.id
                        )))
                    }
                    Some(RouteTarget::Agent(id)) => (id, TransferReason::Routed { note: reason }),
                    None if !candidates.is_empty() => {
                        let enabled: Vec<AgentId> = candidates
                            .iter()
                            .copied()
                            .filter(|c| rt.roster.is_enabled(*c))
                            .collect();
                        let id = agent.pick_candidate(&enabled).ok_or_else(|| {
                            ItineraError::Routing(format!(
                                "none of the candidates {:?} is addressable by {}",
                                candidates, agent.id
                            ))
                        })?;
                        (id, TransferReason::Routed { note: reason })
                    }
                    None => (
                        agent.default_next.unwrap_or(AgentId::Coordinator),
                        TransferReason::DefaultNext,
                    ),
                };

                if !rt.roster.is_enabled(to) || !agent.may_address(to) {
                    return Err(ItineraError::Routing(format!(
                        "{} is not permitted to address {}",
                        agent.id, to
                    )));
                }

                Ok(Step::Handoff(HandoffCommand::to(to, payload, why)))
            }
        }
    }

    /// Dispatch one round of tool calls.
    ///
    /// Consecutive read-only calls run concurrently, at most
    /// `max_concurrent_tool_calls` at a time, and are joined; calls with
    /// external side effects run one at a time. Results are recorded group by
    /// group, so a cancelled round keeps what already finished. A permission
    /// failure stops the round.
    async fn dispatch(
        &self,
        rt: &Runtime,
        agent: &AgentDefinition,
        state: &mut ConversationState,
        calls: &[ToolCallRequest],
    ) -> Result<Dispatched> {
        let mut feedback = Vec::new();

        for group in group_calls(rt, calls) {
            for call in &group {
                state.record(
                    agent.id,
                    Action::ToolCall {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                )?;
            }

            let outcomes = {
                let shared: &ConversationState = state;
                let mut finished: Vec<(usize, CallOutcome)> = stream::iter(0..group.len())
                    .map(|i| {
                        let call = &group[i];
                        async move { (i, self.call_with_retry(rt, agent, shared, call).await) }
                    })
                    .buffer_unordered(rt.limits.max_concurrent_tool_calls)
                    .collect()
                    .await;
                // Record in call order regardless of completion order.
                finished.sort_by_key(|(i, _)| *i);
                finished.into_iter().map(|(_, outcome)| outcome)
            };

            for (call, outcome) in group.iter().zip(outcomes) {
                if let Some(denied) = self.record_outcome(rt, agent, state, call, outcome, &mut feedback)? {
                    return Ok(denied);
                }
            }
        }

        Ok(Dispatched::Fed(feedback))
    }

    async fn call_with_retry(
        &self,
        rt: &Runtime,
        agent: &AgentDefinition,
        state: &ConversationState,
        call: &ToolCallRequest,
    ) -> CallOutcome {
        let idempotent = rt.registry.spec(&call.name).is_some_and(|s| s.idempotent);
        let mut failures = Vec::new();

        loop {
            match rt.registry.invoke(&call.name, &call.arguments, agent, state).await {
                Err(ItineraError::ToolInvocation(e))
                    if e.retryable && idempotent && failures.len() < rt.limits.tool_retry_limit as usize =>
                {
                    debug!("Retrying {} after {}", call.name, e);
                    failures.push(e);
                }
                result => return CallOutcome { failures, result },
            }
        }
    }

    fn record_outcome(
        &self,
        rt: &Runtime,
        agent: &AgentDefinition,
        state: &mut ConversationState,
        call: &ToolCallRequest,
        outcome: CallOutcome,
        feedback: &mut Vec<ModelMessage>,
    ) -> Result<Option<Dispatched>> {
        for (i, error) in outcome.failures.iter().enumerate() {
            state.record(
                agent.id,
                Action::ToolFailed {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    attempt: i as u32 + 1,
                    error: error.clone(),
                },
            )?;
        }

        let fed: Value = match outcome.result {
            Ok(output) => {
                state.record(
                    agent.id,
                    Action::ToolResult {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        artifact: output.artifact,
                        output: output.value.clone(),
                    },
                )?;
                output.value
            }
            Err(ItineraError::ToolInvocation(error)) => {
                state.record(
                    agent.id,
                    Action::ToolFailed {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        attempt: outcome.failures.len() as u32 + 1,
                        error: error.clone(),
                    },
                )?;
                json!({ "error": error })
            }
            Err(ItineraError::Permission(message)) => {
                state.record(
                    agent.id,
                    Action::ToolRejected {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        error_kind: "permission".to_string(),
                        message: message.clone(),
                    },
                )?;
                return Ok(Some(Dispatched::Denied {
                    tool: call.name.clone(),
                    message,
                }));
            }
            Err(e @ ItineraError::SchemaValidation(_)) => {
                state.record(
                    agent.id,
                    Action::ToolRejected {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        error_kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                )?;
                json!({ "error": e.to_string() })
            }
            Err(e) => return Err(e),
        };

        feedback.push(ModelMessage::new(
            MessageRole::Tool,
            rt.prompts.render_feedback(
                &rt.prompts.feedback.tool_result,
                &[("tool", call.name.clone()), ("result", fed.to_string())],
            ),
        ));
        Ok(None)
    }
}

/// A loop-guard escalation shows up as a transfer to the coordinator.
fn handoff_outcome(state: &ConversationState, to: AgentId) -> WorkerOutcome {
    match state.history().last().map(|r| &r.action) {
        Some(Action::Transfer {
            reason: reason @ TransferReason::LoopDetected { .. },
            ..
        }) => WorkerOutcome::Escalated(reason.clone()),
        _ => WorkerOutcome::HandedOff(to),
    }
}

enum Step {
    Tools(Vec<ToolCallRequest>),
    Handoff(HandoffCommand),
    Complete { text: String, payload: Value },
}

enum Dispatched {
    Fed(Vec<ModelMessage>),
    Denied { tool: String, message: String },
}

/// Split calls into runs of consecutive read-only calls and single writes.
///
/// Unknown tools count as writes so they are dispatched (and rejected) alone.
fn group_calls(rt: &Runtime, calls: &[ToolCallRequest]) -> Vec<Vec<ToolCallRequest>> {
    let mut groups: Vec<Vec<ToolCallRequest>> = Vec::new();
    let mut reads: Vec<ToolCallRequest> = Vec::new();

    for call in calls {
        let read_only = rt.registry.spec(&call.name).is_some_and(|s| s.is_read_only());
        if read_only {
            reads.push(call.clone());
        } else {
            if !reads.is_empty() {
                groups.push(std::mem::take(&mut reads));
            }
            groups.push(vec![call.clone()]);
        }
    }
    if !reads.is_empty() {
        groups.push(reads);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::model::ScriptedModelProvider;
    use crate::orchestrator::Orchestrator;
    use crate::tools::RecordingToolProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn orchestrator(settings: &Settings, tools: Arc<RecordingToolProvider>) -> Orchestrator {
        Orchestrator::new(settings, Arc::new(ScriptedModelProvider::new()), tools).unwrap()
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: Some(id.to_string()),
            name: name.to_string(),
            arguments,
        }
    }

    fn mixed_round() -> Vec<ToolCallRequest> {
        vec![
            call("r1", "search_places", json!({"query": "Seoul palaces"})),
            call("r2", "web_search", json!({"query": "Seoul in autumn"})),
            call("w1", "create_share_page", json!({"title": "Seoul", "content": "Plan"})),
            call("r3", "nearby_search", json!({"location": "Jongno"})),
        ]
    }

    /// Location search with the share tool added, active in a confirmed session.
    fn location_session(rt: &Runtime) -> (AgentDefinition, ConversationState) {
        let mut agent = rt.definition(AgentId::LocationSearch).unwrap().clone();
        agent.capabilities.push("create_share_page".to_string());

        let mut state = ConversationState::new("s1");
        state.confirm("create_share_page").unwrap();
        state.add_user_message("plan a trip").unwrap();
        state
            .record(
                AgentId::Coordinator,
                Action::Transfer {
                    from: AgentId::Coordinator,
                    to: AgentId::LocationSearch,
                    payload: json!({}),
                    reason: TransferReason::Routed { note: None },
                },
            )
            .unwrap();
        (agent, state)
    }

    fn recording_tools(delay: Duration) -> Arc<RecordingToolProvider> {
        let tools = RecordingToolProvider::new().with_delay(delay);
        tools.set_result("search_places", json!({"places": [{"name": "Gyeongbokgung"}]}));
        tools.set_result("web_search", json!({"results": [{"title": "Autumn guide"}]}));
        tools.set_result("create_share_page", json!({"url": "https://pages.example/seoul"}));
        tools.set_result("nearby_search", json!({"places": [{"name": "Tosokchon"}]}));
        Arc::new(tools)
    }

    fn position(timeline: &[String], event: &str) -> usize {
        timeline.iter().position(|e| e == event).unwrap()
    }

    #[test]
    fn test_group_calls_splits_reads_around_writes() {
        let orchestrator = orchestrator(&Settings::default(), Arc::new(RecordingToolProvider::new()));
        let groups = group_calls(orchestrator.runtime(), &mixed_round());

        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|c| c.name.as_str()).collect())
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["search_places", "web_search"],
                vec!["create_share_page"],
                vec!["nearby_search"],
            ]
        );
    }

    #[test]
    fn test_group_calls_isolates_unknown_tools() {
        let orchestrator = orchestrator(&Settings::default(), Arc::new(RecordingToolProvider::new()));
        let calls = vec![
            call("r1", "search_places", json!({"query": "cafe"})),
            call("x1", "book_flight", json!({})),
            call("r2", "web_search", json!({"query": "cafe"})),
        ];
        let sizes: Vec<usize> = group_calls(orchestrator.runtime(), &calls).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn test_dispatch_overlaps_reads_and_serialises_writes() {
        let tools = recording_tools(Duration::from_millis(50));
        let orchestrator = orchestrator(&Settings::default(), tools.clone());
        let rt = orchestrator.runtime();
        let (agent, mut state) = location_session(rt);

        let dispatched = Worker::new().dispatch(rt, &agent, &mut state, &mixed_round()).await.unwrap();
        assert!(matches!(dispatched, Dispatched::Fed(ref feedback) if feedback.len() == 4));

        let timeline = tools.timeline();
        assert_eq!(tools.peak_concurrency(), 2);
        // Both reads start before either finishes.
        let first_end = position(&timeline, "end search_places").min(position(&timeline, "end web_search"));
        assert!(position(&timeline, "start search_places") < first_end);
        assert!(position(&timeline, "start web_search") < first_end);
        // The write waits for both reads, and the trailing read waits for the write.
        let write_start = position(&timeline, "start create_share_page");
        assert!(position(&timeline, "end search_places") < write_start);
        assert!(position(&timeline, "end web_search") < write_start);
        assert!(position(&timeline, "end create_share_page") < position(&timeline, "start nearby_search"));

        let results: Vec<&str> = state
            .history()
            .iter()
            .filter_map(|r| match &r.action {
                Action::ToolResult { tool, .. } => Some(tool.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec!["search_places", "web_search", "create_share_page", "nearby_search"]);
        assert_eq!(state.context().share_links, vec!["https://pages.example/seoul"]);
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency_limit() {
        let mut settings = Settings::default();
        settings.orchestration.max_concurrent_tool_calls = 1;
        let tools = recording_tools(Duration::from_millis(20));
        let orchestrator = orchestrator(&settings, tools.clone());
        let rt = orchestrator.runtime();
        let (agent, mut state) = location_session(rt);

        let reads = vec![
            call("r1", "search_places", json!({"query": "Seoul palaces"})),
            call("r2", "web_search", json!({"query": "Seoul in autumn"})),
            call("r3", "nearby_search", json!({"location": "Jongno"})),
        ];
        Worker::new().dispatch(rt, &agent, &mut state, &reads).await.unwrap();

        assert_eq!(tools.total_calls(), 3);
        assert_eq!(tools.peak_concurrency(), 1);
        assert_eq!(state.context().places.len(), 2);
    }
}
