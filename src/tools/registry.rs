//! Capability-checked tool dispatch.

use super::{builtin_tools, Artifact, ToolError, ToolErrorKind, ToolProvider, ToolSpec};
use crate::agent::AgentDefinition;
use crate::conversation::ConversationState;
use crate::error::{ItineraError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Successful result of a dispatched tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub tool: String,
    pub artifact: Artifact,
    pub value: Value,
}

struct RegisteredTool {
    spec: ToolSpec,
    validator: jsonschema::Validator,
}

/// Registry of declared tools bound to a single provider.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    provider: Arc<dyn ToolProvider>,
    call_timeout: Duration,
}

impl ToolRegistry {
    /// Register `specs`, compiling each input schema once.
    pub fn new(specs: Vec<ToolSpec>, provider: Arc<dyn ToolProvider>) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for spec in specs {
            let validator = jsonschema::validator_for(&spec.input_schema).map_err(|e| {
                ItineraError::Config(format!("Invalid input schema for tool '{}': {}", spec.name, e))
            })?;
            if tools.contains_key(&spec.name) {
                return Err(ItineraError::Config(format!("Tool '{}' declared twice", spec.name)));
            }
            tools.insert(spec.name.clone(), RegisteredTool { spec, validator });
        }

        Ok(Self {
            tools,
            provider,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        })
    }

    /// Registry with the built-in catalog.
    pub fn builtin(provider: Arc<dyn ToolProvider>) -> Result<Self> {
        Self::new(builtin_tools(), provider)
    }

    /// Set the per-call timeout applied to provider requests.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// Declared tools in name order.
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values().map(|t| &t.spec)
    }

    /// Tools visible to an agent, in capability order.
    pub fn specs_for(&self, agent: &AgentDefinition) -> Vec<&ToolSpec> {
        agent
            .capabilities
            .iter()
            .filter_map(|name| self.spec(name))
            .collect()
    }

    /// Validate `args` against a tool's schema without dispatching.
    pub fn validate(&self, tool_name: &str, args: &Value) -> Result<()> {
        let tool = self.tools.get(tool_name).ok_or_else(|| {
            ItineraError::SchemaValidation(format!("Tool '{}' is not declared", tool_name))
        })?;

        let errors: Vec<String> = tool
            .validator
            .iter_errors(args)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ItineraError::SchemaValidation(format!(
                "Invalid arguments for '{}': {}",
                tool_name,
                errors.join("; ")
            )))
        }
    }

    /// Dispatch a tool call on behalf of `agent`.
    ///
    /// Checks run in order and stop at the first failure: capability set,
    /// argument schema, confirmation flag. The provider is only reached when
    /// all of them pass.
    #[instrument(skip(self, args, agent, state), fields(tool = %tool_name, agent = %agent.id))]
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: &Value,
        agent: &AgentDefinition,
        state: &ConversationState,
    ) -> Result<ToolOutput> {
        if !agent.can_use(tool_name) {
            warn!("Rejected {} for {}: outside capability set", tool_name, agent.id);
            return Err(ItineraError::Permission(format!(
                "'{}' is not in the capability set of {}",
                tool_name, agent.id
            )));
        }

        let spec = self
            .spec(tool_name)
            .ok_or_else(|| ItineraError::Permission(format!("Tool '{}' is not registered", tool_name)))?;

        self.validate(tool_name, args)?;

        if spec.requires_confirmation && !state.is_confirmed(tool_name) {
            warn!("Rejected {}: no confirmation recorded", tool_name);
            return Err(ItineraError::Permission(format!(
                "'{}' is irreversible and requires user confirmation",
                tool_name
            )));
        }

        debug!("Dispatching {} with args {}", tool_name, args);

        let value = match tokio::time::timeout(self.call_timeout, self.provider.invoke(tool_name, args)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(ItineraError::ToolInvocation(e)),
            Err(_) => {
                return Err(ItineraError::ToolInvocation(ToolError::new(
                    ToolErrorKind::Timeout,
                    format!("'{}' did not answer within {:?}", tool_name, self.call_timeout),
                )))
            }
        };

        Ok(ToolOutput {
            tool: tool_name.to_string(),
            artifact: spec.artifact,
            value,
        })
    }
}
