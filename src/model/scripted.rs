//! Deterministic model provider.

use super::{ModelProvider, ModelRequest};
use crate::agent::AgentId;
use crate::error::{ItineraError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Answers from a per-agent queue of raw outputs and records every request.
///
/// Used by tests and by `plan --script` for offline runs. Asking an agent
/// whose queue is empty is a provider error.
#[derive(Default)]
pub struct ScriptedModelProvider {
    queues: Mutex<HashMap<AgentId, VecDeque<Value>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a script file: a JSON object mapping agent names to output lists.
    ///
    /// ```json
    /// { "coordinator": [{"kind": "handoff", "target": "planner"}], "planner": [] }
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let script: BTreeMap<String, Vec<Value>> = serde_json::from_str(&content)?;

        let provider = Self::new();
        for (name, outputs) in script {
            let agent: AgentId = name
                .parse()
                .map_err(|e: String| ItineraError::InvalidInput(format!("{}: {}", path.display(), e)))?;
            provider.push_many(agent, outputs);
        }
        Ok(provider)
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, agent: AgentId, output: Value) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(agent).or_default().push_back(output);
        }
    }

    pub fn push_many<I>(&self, agent: AgentId, outputs: I)
    where
        I: IntoIterator<Item = Value>,
    {
        for output in outputs {
            self.push(agent, output);
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, agent: AgentId) -> Vec<ModelRequest> {
        self.requests().into_iter().filter(|r| r.agent == agent).collect()
    }

    /// Outputs still queued for `agent`.
    pub fn remaining(&self, agent: AgentId) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(&agent).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ModelProvider for ScriptedModelProvider {
    async fn generate(&self, request: &ModelRequest) -> Result<Value> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .queues
            .lock()
            .map_err(|_| ItineraError::Model("script lock poisoned".to_string()))?
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front);

        next.ok_or_else(|| ItineraError::Model(format!("script exhausted for {}", request.agent)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
