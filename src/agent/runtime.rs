//! Shared services every agent turn runs against.

use super::{AgentDefinition, AgentId, AgentRoster, RouteTarget};
use crate::config::{ModelSettings, OrchestrationSettings, Prompts};
use crate::conversation::ConversationState;
use crate::error::{ItineraError, Result};
use crate::handoff::HandoffProtocol;
use crate::model::{ModelMessage, ModelProvider, ModelRequest, OutputSchema, StructuredOutput, ToolSchema};
use crate::tools::ToolRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Immutable, process-wide dependencies of the engine.
pub struct Runtime {
    pub roster: Arc<AgentRoster>,
    pub registry: Arc<ToolRegistry>,
    pub model: Arc<dyn ModelProvider>,
    pub output_schema: OutputSchema,
    pub prompts: Prompts,
    pub models: ModelSettings,
    pub protocol: HandoffProtocol,
    pub limits: OrchestrationSettings,
}

impl Runtime {
    pub fn definition(&self, id: AgentId) -> Result<&AgentDefinition> {
        self.roster
            .get(id)
            .ok_or_else(|| ItineraError::Routing(format!("{} is not enabled", id)))
    }

    /// Targets an agent may name, for the model's benefit.
    pub fn routes_for(&self, agent: &AgentDefinition) -> Vec<RouteTarget> {
        let mut routes: Vec<RouteTarget> = AgentId::ALL
            .iter()
            .copied()
            .filter(|id| self.roster.is_enabled(*id) && agent.may_address(*id))
            .map(RouteTarget::Agent)
            .collect();
        if agent.id.is_coordinator() {
            routes.push(RouteTarget::Terminate);
        }
        routes
    }

    /// Build the model request for `agent` in the current state.
    pub fn request(
        &self,
        agent: &AgentDefinition,
        state: &ConversationState,
        messages: Vec<ModelMessage>,
    ) -> ModelRequest {
        let confirmations: Vec<&str> = state.confirmations().collect();
        ModelRequest {
            agent: agent.id,
            model: self.models.resolve(&agent.model_alias),
            system_prompt: self.prompts.system_for(agent.id),
            context: json!({
                "session_id": state.session_id(),
                "task": state.context(),
                "incoming": state.inbox(),
                "confirmations": confirmations,
                "default_next": agent.default_next,
            }),
            messages,
            tools: self
                .registry
                .specs_for(agent)
                .into_iter()
                .map(ToolSchema::from)
                .collect(),
            routes: self.routes_for(agent),
        }
    }

    /// Ask the model and validate its answer.
    ///
    /// Returns the raw output alongside the parsed one so it can be logged.
    /// Provider failures and schema failures both come back as
    /// `SchemaValidation`, the caller's malformed-signal path.
    pub async fn ask(&self, request: &ModelRequest) -> Result<(Value, StructuredOutput)> {
        let raw = self.model.generate(request).await.map_err(|e| match e {
            ItineraError::SchemaValidation(_) => e,
            other => ItineraError::SchemaValidation(format!("no usable output: {}", other)),
        })?;
        debug!("{} answered {}", request.agent, raw);
        let output = self.output_schema.parse(&raw)?;
        Ok((raw, output))
    }
}
