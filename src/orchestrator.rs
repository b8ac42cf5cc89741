//! Run loop for Itinera.
//!
//! Drives one user message from the coordinator through the workers until
//! the session pauses for the user or terminates.

use crate::agent::{AgentRoster, Coordinator, Decision, Runtime, Worker, WorkerOutcome, APOLOGY};
use crate::assembler::{assemble, FinalResponse};
use crate::config::{ModelProviderKind, Prompts, Settings};
use crate::conversation::{Action, ConversationState, TerminationCause, TransferReason};
use crate::error::{ItineraError, Result};
use crate::handoff::{HandoffProtocol, LoopGuard};
use crate::model::{ModelProvider, OpenAIModelProvider, OutputSchema, ScriptedModelProvider};
use crate::session::Session;
use crate::tools::{GatewayClient, LocalToolProvider, ToolProvider, ToolRegistry};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tracing::{info, instrument, warn};

const TIMEOUT_MESSAGE: &str = "I ran out of time before finishing. Here is what I have so far.";
const TRANSITION_LIMIT_MESSAGE: &str =
    "The agents passed the request around too many times, so I stopped. Here is what I have so far.";

/// The main orchestrator for Itinera.
pub struct Orchestrator {
    runtime: Runtime,
    coordinator: Coordinator,
    worker: Worker,
}

impl Orchestrator {
    /// Create an orchestrator over explicit model and tool providers.
    pub fn new(settings: &Settings, model: Arc<dyn ModelProvider>, tools: Arc<dyn ToolProvider>) -> Result<Self> {
        settings.orchestration.validate()?;

        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let roster = Arc::new(
            AgentRoster::standard(settings.agents.verifier_enabled).with_model_aliases(&settings.agents.aliases),
        );
        let registry = Arc::new(ToolRegistry::builtin(tools)?.with_call_timeout(settings.tools.timeout()));
        let limits = settings.orchestration.clone();
        let guard = LoopGuard::new(limits.loop_window, limits.loop_max_repeats, limits.self_handoff_limit);

        info!("Using model provider {}", model.name());

        Ok(Self {
            runtime: Runtime {
                protocol: HandoffProtocol::new(roster.clone(), guard),
                roster,
                registry,
                model,
                output_schema: OutputSchema::new()?,
                prompts,
                models: settings.model.clone(),
                limits,
            },
            coordinator: Coordinator::new(),
            worker: Worker::new(),
        })
    }

    /// Create an orchestrator from settings alone.
    ///
    /// `script` is required for the scripted provider and selects it when the
    /// settings name OpenAI, so offline runs need no API key.
    pub fn from_settings(settings: &Settings, script: Option<&Path>) -> Result<Self> {
        let model: Arc<dyn ModelProvider> = match (script, settings.model.provider) {
            (Some(path), _) => Arc::new(ScriptedModelProvider::from_file(path)?),
            (None, ModelProviderKind::Scripted) => {
                return Err(ItineraError::Config(
                    "The scripted model provider needs a script file (--script)".to_string(),
                ))
            }
            (None, ModelProviderKind::OpenAI) => Arc::new(
                OpenAIModelProvider::new(std::time::Duration::from_secs(settings.model.timeout_secs))?
                    .with_temperature(settings.model.temperature),
            ),
        };

        let gateway = settings
            .tools
            .gateway_url
            .as_deref()
            .map(|url| GatewayClient::new(url, settings.tools.timeout()))
            .transpose()?;
        if gateway.is_none() {
            warn!("No tool gateway configured; map, calendar and share tools will fail");
        }

        Self::new(settings, model, Arc::new(LocalToolProvider::new(gateway)))
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Handle one user message and return the assembled response.
    ///
    /// Runs under the per-message deadline and transition bound. Routing,
    /// schema, tool and loop failures are absorbed into the history and show
    /// up as notices; only store failures and invalid requests are returned
    /// as errors. Every record is flushed to the store as soon as its step
    /// finishes.
    #[instrument(skip(self, session, text), fields(session = %session.id()))]
    pub async fn handle_message(&self, session: &mut Session, text: &str) -> Result<FinalResponse> {
        if text.trim().is_empty() {
            return Err(ItineraError::InvalidInput("message must not be empty".to_string()));
        }
        if session.state().is_terminal() {
            return Err(ItineraError::Session(format!(
                "Session {} is terminated",
                session.id()
            )));
        }

        session.state_mut().add_user_message(text)?;
        session.flush().await?;

        let deadline = Instant::now() + self.runtime.limits.session_timeout();

        loop {
            let state = session.state();
            if state.is_terminal() || state.awaiting_user().is_some() {
                break;
            }

            if transitions(state) >= self.runtime.limits.max_transitions {
                warn!("Transition limit of {} reached", self.runtime.limits.max_transitions);
                self.abort(
                    session.state_mut(),
                    TransferReason::BudgetExceeded {
                        budget: self.runtime.limits.max_transitions,
                    },
                    TerminationCause::TransitionLimit,
                    TRANSITION_LIMIT_MESSAGE,
                )?;
                session.flush().await?;
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let stepped = timeout(remaining, self.step(session.state_mut())).await;
            match stepped {
                Ok(Ok(())) => {}
                Ok(Err(e)) if is_taxonomy(&e) => {
                    warn!("Unrecovered {} error: {}", e.kind(), e);
                    self.abort(
                        session.state_mut(),
                        TransferReason::Unrecovered { error: e.to_string() },
                        TerminationCause::RetriesExhausted,
                        APOLOGY,
                    )?;
                }
                Ok(Err(e)) => {
                    session.flush().await?;
                    return Err(e);
                }
                Err(_) => {
                    let active = session.state().active();
                    warn!("Session deadline expired while {} was active", active);
                    session.state_mut().record(
                        active,
                        Action::Cancelled {
                            during: active.to_string(),
                        },
                    )?;
                    self.abort(
                        session.state_mut(),
                        TransferReason::Timeout,
                        TerminationCause::Timeout,
                        TIMEOUT_MESSAGE,
                    )?;
                }
            }
            session.flush().await?;
        }

        Ok(assemble(session.state()))
    }

    /// Run whichever agent is active for one activation.
    async fn step(&self, state: &mut ConversationState) -> Result<()> {
        if state.active().is_coordinator() {
            match self.coordinator.decide(&self.runtime, state).await? {
                Decision::Handoff(to) => info!("Coordinator handed off to {}", to),
                Decision::AwaitingUser(_) => info!("Waiting for the user"),
                Decision::Terminated(cause) => info!("Session terminated ({:?})", cause),
            }
            return Ok(());
        }

        let agent = state.active();
        match self.worker.run(&self.runtime, state).await? {
            WorkerOutcome::HandedOff(to) => info!("{} handed off to {}", agent, to),
            WorkerOutcome::Escalated(reason) => warn!("{} escalated: {}", agent, reason.label()),
            WorkerOutcome::Completed { text } => {
                state.record(
                    agent,
                    Action::Terminated {
                        cause: TerminationCause::Completed,
                        message: text,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Force control back to the coordinator and end the session.
    fn abort(
        &self,
        state: &mut ConversationState,
        reason: TransferReason,
        cause: TerminationCause,
        message: &str,
    ) -> Result<()> {
        if state.is_terminal() {
            return Ok(());
        }
        self.runtime.protocol.escalate(state, json!({}), reason)?;
        self.coordinator.conclude(state, cause, message)
    }
}

/// Transfers recorded while handling the latest user message.
fn transitions(state: &ConversationState) -> usize {
    state
        .current_turn()
        .iter()
        .filter(|r| matches!(r.action, Action::Transfer { .. }))
        .count()
}

fn is_taxonomy(error: &ItineraError) -> bool {
    matches!(
        error,
        ItineraError::Routing(_)
            | ItineraError::ToolInvocation(_)
            | ItineraError::LoopGuard { .. }
            | ItineraError::SchemaValidation(_)
            | ItineraError::Permission(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentId, RouteTarget};
    use crate::assembler::ResponseStatus;
    use crate::store::{HistoryStore, MemoryHistoryStore};
    use crate::tools::RecordingToolProvider;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Harness {
        orchestrator: Orchestrator,
        model: Arc<ScriptedModelProvider>,
        tools: Arc<RecordingToolProvider>,
        store: Arc<dyn HistoryStore>,
    }

    fn harness_with(settings: Settings, model: ScriptedModelProvider) -> Harness {
        let model = Arc::new(model);
        let tools = Arc::new(RecordingToolProvider::new());
        tools.set_result(
            "create_travel_plan",
            json!({"destination": "Seoul", "duration": 4, "itinerary": [
                {"day": 1, "date": null, "activities": [{"time": "09:00", "activity": "arrive in Seoul"}]},
                {"day": 2, "date": null, "activities": []},
                {"day": 3, "date": null, "activities": []},
                {"day": 4, "date": null, "activities": []}
            ]}),
        );
        tools.set_result(
            "search_places",
            json!({"places": [{"name": "Gyeongbokgung"}, {"name": "Bukchon Hanok Village"}]}),
        );
        tools.set_result("create_calendar_event", json!({"event_id": "ev-1"}));
        tools.set_result("create_share_page", json!({"url": "https://pages.example/seoul"}));

        let orchestrator = Orchestrator::new(&settings, model.clone(), tools.clone()).unwrap();
        Harness {
            orchestrator,
            model,
            tools,
            store: Arc::new(MemoryHistoryStore::new()),
        }
    }

    fn harness(model: ScriptedModelProvider) -> Harness {
        harness_with(Settings::default(), model)
    }

    fn handoff(target: &str, payload: Value) -> Value {
        json!({"kind": "handoff", "target": target, "payload": payload})
    }

    fn tool_call(id: &str, name: &str, arguments: Value) -> Value {
        json!({"kind": "tool_calls", "calls": [{"id": id, "name": name, "arguments": arguments}]})
    }

    fn completion(text: &str) -> Value {
        json!({"kind": "completion", "text": text})
    }

    /// The full Seoul trip: planner, places, calendar, share.
    fn seoul_script() -> ScriptedModelProvider {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                handoff("planner", json!({"destination": "Seoul", "nights": 3})),
                handoff("calendar", json!({})),
            ],
        );
        model.push_many(
            AgentId::Planner,
            [
                tool_call("p1", "create_travel_plan", json!({"destination": "Seoul", "duration": 4})),
                handoff("location_search", json!({"destination": "Seoul"})),
                handoff("coordinator", json!({})),
            ],
        );
        model.push_many(
            AgentId::LocationSearch,
            [
                tool_call("l1", "search_places", json!({"query": "Seoul attractions"})),
                handoff("planner", json!({})),
            ],
        );
        model.push_many(
            AgentId::Calendar,
            [
                tool_call(
                    "c1",
                    "create_calendar_event",
                    json!({"title": "Seoul trip", "start_date": "2026-11-01"}),
                ),
                handoff("share", json!({})),
            ],
        );
        model.push_many(
            AgentId::Share,
            [
                tool_call(
                    "s1",
                    "create_share_page",
                    json!({"title": "Seoul, 3 nights", "content": "Day by day plan"}),
                ),
                completion("Your Seoul trip is ready to share."),
            ],
        );
        model
    }

    async fn new_session(h: &Harness) -> Session {
        Session::create(h.store.clone(), Some("s1")).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_trip_with_confirmations() {
        let h = harness(seoul_script());
        let mut session = new_session(&h).await;
        session.confirm("create_calendar_event").await.unwrap();
        session.confirm("create_share_page").await.unwrap();

        let response = h
            .orchestrator
            .handle_message(&mut session, "plan a 3-night, 4-day Seoul trip")
            .await
            .unwrap();

        assert_eq!(response.status, ResponseStatus::Complete);
        assert_eq!(response.message, "Your Seoul trip is ready to share.");
        assert!(response.itinerary.is_some());
        assert_eq!(response.places.len(), 2);
        assert_eq!(response.share_links, vec!["https://pages.example/seoul"]);
        assert_eq!(response.calendar_events.len(), 1);
        assert!(response.notices.is_empty());
        assert!(session.state().is_terminal());
        assert_eq!(h.tools.calls_to("create_calendar_event"), 1);

        let visited: Vec<AgentId> = session
            .state()
            .history()
            .iter()
            .filter_map(|r| match r.action {
                Action::Transfer { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            visited,
            vec![
                AgentId::Planner,
                AgentId::LocationSearch,
                AgentId::Planner,
                AgentId::Coordinator,
                AgentId::Calendar,
                AgentId::Share,
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_matches_live_state() {
        let h = harness(seoul_script());
        let mut session = new_session(&h).await;
        session.confirm("create_calendar_event").await.unwrap();
        session.confirm("create_share_page").await.unwrap();
        h.orchestrator
            .handle_message(&mut session, "plan a 3-night, 4-day Seoul trip")
            .await
            .unwrap();

        let reopened = Session::open(h.store.clone(), "s1").await.unwrap();
        assert_eq!(reopened.state(), session.state());

        let log = session.state().history().to_vec();
        let (prefix, suffix) = log.split_at(log.len() / 2);
        let mut resumed = ConversationState::replay("s1", prefix.to_vec()).unwrap();
        for record in suffix {
            resumed.append(record.clone()).unwrap();
        }
        assert_eq!(&resumed, session.state());
        assert_eq!(assemble(&resumed), assemble(session.state()));
    }

    #[tokio::test]
    async fn test_malformed_coordinator_output_ends_in_apology() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                json!({"kind": "handoff", "target": "travel_agent"}),
                json!({"route": "planner"}),
                json!("planner please"),
            ],
        );
        let h = harness(model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();

        assert_eq!(response.status, ResponseStatus::Apology);
        assert_eq!(response.message, APOLOGY);
        assert_eq!(session.state().termination().map(|(c, _)| c), Some(TerminationCause::RetriesExhausted));
        let invalid = session
            .state()
            .history()
            .iter()
            .filter(|r| matches!(r.action, Action::InvalidOutput { .. }))
            .count();
        assert_eq!(invalid, 3);
        assert_eq!(h.tools.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_calendar_without_confirmation_makes_no_call() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                handoff("calendar", json!({})),
                completion("Shall I add the trip to your calendar?"),
            ],
        );
        let h = harness(model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "put it in my calendar").await.unwrap();

        assert_eq!(response.status, ResponseStatus::AwaitingUser);
        assert_eq!(response.message, "Shall I add the trip to your calendar?");
        assert_eq!(h.tools.calls_to("create_calendar_event"), 0);
        assert_eq!(session.state().active(), AgentId::Coordinator);
        assert!(!session.state().is_terminal());
    }

    #[tokio::test]
    async fn test_unconfirmed_share_escalates_with_permission_denied() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                handoff("share", json!({})),
                completion("Publishing needs your confirmation. Go ahead?"),
            ],
        );
        model.push(
            AgentId::Share,
            tool_call("s1", "create_share_page", json!({"title": "Trip", "content": "Plan"})),
        );
        let h = harness(model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "share my plan").await.unwrap();

        assert_eq!(h.tools.calls_to("create_share_page"), 0);
        assert_eq!(response.status, ResponseStatus::AwaitingUser);
        assert!(response.notices.iter().any(|n| n.contains("create_share_page")));
        assert!(matches!(
            session.state().last_escalation(),
            Some(TransferReason::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_tool_outside_capabilities_is_rejected() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [handoff("planner", json!({})), completion("Anything else?")],
        );
        model.push(
            AgentId::Planner,
            tool_call("p1", "create_calendar_event", json!({"title": "Trip", "start_date": "2026-11-01"})),
        );
        let h = harness(model);
        let mut session = new_session(&h).await;
        session.confirm("create_calendar_event").await.unwrap();

        h.orchestrator.handle_message(&mut session, "plan it").await.unwrap();

        assert_eq!(h.tools.total_calls(), 0);
        let rejected = session.state().history().iter().any(|r| {
            matches!(&r.action, Action::ToolRejected { error_kind, .. } if error_kind == "permission")
        });
        assert!(rejected);
    }

    #[tokio::test]
    async fn test_ping_pong_is_stopped_by_loop_guard() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                handoff("planner", json!({})),
                // The blocked handoff, re-issued unchanged.
                handoff("planner", json!({})),
                completion("I keep going back and forth. Which district do you prefer?"),
            ],
        );
        model.push_many(
            AgentId::Planner,
            [handoff("location_search", json!({})), handoff("location_search", json!({}))],
        );
        model.push_many(
            AgentId::LocationSearch,
            [handoff("planner", json!({})), handoff("planner", json!({}))],
        );
        let h = harness(model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();

        assert_eq!(response.status, ResponseStatus::AwaitingUser);
        assert!(response.notices.iter().any(|n| n.contains("repeated handoffs")));
        let escalated = session.state().history().iter().any(|r| {
            matches!(r.action, Action::Transfer { reason: TransferReason::LoopDetected { .. }, .. })
        });
        assert!(escalated);
        assert_eq!(h.model.remaining(AgentId::Coordinator), 0);
    }

    fn ping_pong_workers(model: &ScriptedModelProvider) {
        model.push_many(
            AgentId::Planner,
            [handoff("location_search", json!({})), handoff("location_search", json!({}))],
        );
        model.push_many(
            AgentId::LocationSearch,
            [handoff("planner", json!({})), handoff("planner", json!({}))],
        );
    }

    #[tokio::test]
    async fn test_loop_escalation_refuses_handoff_to_other_worker() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                handoff("planner", json!({})),
                handoff("share", json!({"note": "publish what we have"})),
                json!({"kind": "handoff", "target": "TERMINATE", "reason": "Stopping here."}),
            ],
        );
        ping_pong_workers(&model);
        let h = harness(model);
        let mut session = new_session(&h).await;
        session.confirm("create_share_page").await.unwrap();

        let response = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();

        assert_eq!(response.message, "Stopping here.");
        assert_eq!(h.model.requests_for(AgentId::Share).len(), 0);
        assert_eq!(h.tools.total_calls(), 0);
        let reached_share = session
            .state()
            .history()
            .iter()
            .any(|r| matches!(r.action, Action::Transfer { to: AgentId::Share, .. }));
        assert!(!reached_share);
        let refused = session.state().history().iter().any(|r| {
            r.agent == AgentId::Coordinator && matches!(r.action, Action::InvalidOutput { .. })
        });
        assert!(refused);

        let offered = h.model.requests_for(AgentId::Coordinator).pop().unwrap();
        assert_eq!(offered.routes, vec![RouteTarget::Terminate]);
    }

    #[tokio::test]
    async fn test_loop_escalation_with_only_handoffs_ends_in_apology() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                handoff("planner", json!({})),
                handoff("share", json!({})),
                handoff("location_search", json!({"query": "cafes"})),
                json!({"kind": "handoff", "candidates": ["planner", "share"]}),
            ],
        );
        ping_pong_workers(&model);
        let h = harness(model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();

        assert_eq!(response.status, ResponseStatus::Apology);
        assert_eq!(
            session.state().termination().map(|(c, _)| c),
            Some(TerminationCause::RetriesExhausted)
        );
        assert_eq!(h.model.requests_for(AgentId::Share).len(), 0);
    }

    #[tokio::test]
    async fn test_tool_budget_forces_escalation() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [handoff("location_search", json!({})), json!({"kind": "handoff", "target": "TERMINATE"})],
        );
        for i in 0..6 {
            model.push(
                AgentId::LocationSearch,
                tool_call(&format!("l{}", i), "search_places", json!({"query": "cafe"})),
            );
        }
        let h = harness(model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "find cafes").await.unwrap();

        assert_eq!(response.status, ResponseStatus::Complete);
        assert_eq!(h.tools.calls_to("search_places"), 5);
        assert!(response.notices.iter().any(|n| n.contains("5 tool rounds")));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried_for_idempotent_tool() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [handoff("location_search", json!({})), completion("Found them. Anything else?")],
        );
        model.push_many(
            AgentId::LocationSearch,
            [
                tool_call("l1", "search_places", json!({"query": "Seoul"})),
                completion("Found places."),
            ],
        );
        let h = harness(model);
        h.tools.push_failure(
            "search_places",
            crate::tools::ToolError::new(crate::tools::ToolErrorKind::RateLimited, "slow down"),
        );
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "find places").await.unwrap();

        assert_eq!(h.tools.calls_to("search_places"), 2);
        assert_eq!(response.places.len(), 2);
        assert!(!response.notices.iter().any(|n| n.contains("failed")));
    }

    #[tokio::test]
    async fn test_deadline_cancels_and_keeps_partial_results() {
        let mut settings = Settings::default();
        settings.orchestration.session_timeout_secs = 1;
        let model = ScriptedModelProvider::new().with_delay(Duration::from_millis(400));
        model.push(AgentId::Coordinator, handoff("planner", json!({})));
        model.push_many(
            AgentId::Planner,
            [
                tool_call("p1", "create_travel_plan", json!({"destination": "Seoul", "duration": 4})),
                handoff("location_search", json!({})),
            ],
        );
        let h = harness_with(settings, model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();

        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert!(response.itinerary.is_some());
        assert!(response.notices.iter().any(|n| n.contains("deadline")));
        assert_eq!(session.state().termination().map(|(c, _)| c), Some(TerminationCause::Timeout));
        assert_eq!(session.unflushed(), 0);
    }

    #[tokio::test]
    async fn test_transition_limit_terminates() {
        let mut settings = Settings::default();
        settings.orchestration.max_transitions = 2;
        let model = ScriptedModelProvider::new();
        model.push(AgentId::Coordinator, handoff("planner", json!({})));
        model.push(AgentId::Planner, handoff("location_search", json!({})));
        let h = harness_with(settings, model);
        let mut session = new_session(&h).await;

        let response = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();

        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(
            session.state().termination().map(|(c, _)| c),
            Some(TerminationCause::TransitionLimit)
        );
        assert_eq!(h.model.requests_for(AgentId::LocationSearch).len(), 0);
    }

    #[tokio::test]
    async fn test_terminated_session_refuses_messages() {
        let model = ScriptedModelProvider::new();
        model.push(AgentId::Coordinator, json!({"kind": "handoff", "target": "TERMINATE"}));
        let h = harness(model);
        let mut session = new_session(&h).await;
        h.orchestrator.handle_message(&mut session, "never mind").await.unwrap();

        let result = h.orchestrator.handle_message(&mut session, "actually...").await;
        assert!(matches!(result, Err(ItineraError::Session(_))));
    }

    #[tokio::test]
    async fn test_follow_up_message_resumes_at_coordinator() {
        let model = ScriptedModelProvider::new();
        model.push_many(
            AgentId::Coordinator,
            [
                completion("Which city?"),
                json!({"kind": "handoff", "target": "TERMINATE", "reason": "Nothing to plan yet."}),
            ],
        );
        let h = harness(model);
        let mut session = new_session(&h).await;

        let first = h.orchestrator.handle_message(&mut session, "plan a trip").await.unwrap();
        assert_eq!(first.status, ResponseStatus::AwaitingUser);

        let second = h.orchestrator.handle_message(&mut session, "Busan").await.unwrap();
        assert_eq!(second.status, ResponseStatus::Complete);
        assert_eq!(second.message, "Nothing to plan yet.");

        let last_request = h.model.requests_for(AgentId::Coordinator).pop().unwrap();
        assert!(last_request.messages.iter().any(|m| m.content == "Busan"));
    }
}
