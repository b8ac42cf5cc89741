//! Prompt templates for Itinera agents.
//!
//! Prompts can be customized by placing an `agents.toml` in the custom prompts
//! directory. Any section left out keeps its default.

use crate::agent::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const OUTPUT_CONTRACT: &str = r#"Every reply is exactly one action:
- call one or more of your tools,
- call `handoff` to pass control on (omit `target` to use your default next step),
- call `complete` when your task is finished.
Never put routing decisions in free text."#;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub coordinator: AgentPrompt,
    pub planner: AgentPrompt,
    pub location_search: AgentPrompt,
    pub calendar: AgentPrompt,
    pub share: AgentPrompt,
    pub verifier: AgentPrompt,
    pub feedback: FeedbackPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// System prompt for one agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentPrompt {
    pub system: String,
}

impl AgentPrompt {
    fn new(system: &str) -> Self {
        Self {
            system: format!("{}\n\n{}", system, OUTPUT_CONTRACT),
        }
    }
}

/// Messages the engine sends back to an agent after rejecting its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackPrompts {
    /// Sent after an invalid output. Variables: `attempt`, `max_attempts`, `error`.
    pub invalid_output: String,
    /// Sent to the coordinator after a loop escalation. Variables: `agent`.
    pub loop_detected: String,
    /// Sent after a tool result or failure. Variables: `tool`, `result`.
    pub tool_result: String,
}

impl Default for FeedbackPrompts {
    fn default() -> Self {
        Self {
            invalid_output: "Your last reply was rejected (attempt {{attempt}} of {{max_attempts}}): {{error}}. \
                Reply again with exactly one valid action."
                .to_string(),
            loop_detected: "Control kept returning to {{agent}} without progress. Do not hand off to any \
                worker for this request: either end the session with TERMINATE or ask the user a \
                clarifying question with `complete`."
                .to_string(),
            tool_result: "{{tool}} returned:\n{{result}}".to_string(),
        }
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            coordinator: AgentPrompt::new(
                "You coordinate a team of travel-planning agents for {{app_name}}. Read the conversation \
                 and the task context, then route the request to exactly one worker with `handoff`: \
                 planner drafts the itinerary, location_search finds places, calendar writes the trip \
                 to the calendar (only after the user confirmed it), share publishes a shareable page. \
                 Use target TERMINATE when the request is fully handled. If you need more information \
                 from the user, call `complete` with your question as the text.",
            ),
            planner: AgentPrompt::new(
                "You are the itinerary planner. Build a day-by-day plan with create_travel_plan and \
                 check it with validate_travel_plan. When the plan needs concrete places, hand off to \
                 location_search. Put the draft under `itinerary` in the handoff payload when you \
                 return to the coordinator.",
            ),
            location_search: AgentPrompt::new(
                "You find real places for the itinerary. Use search_places for named places and \
                 nearby_search for categories around a location. Return the places under `places` in \
                 your handoff payload.",
            ),
            calendar: AgentPrompt::new(
                "You write the confirmed itinerary to the user's calendar with create_calendar_event, \
                 one event per trip. Hand off to share when the user also wants a shareable page.",
            ),
            share: AgentPrompt::new(
                "You publish the final itinerary as a shareable page with create_share_page and then \
                 call `complete` with a short summary that includes the link.",
            ),
            verifier: AgentPrompt::new(
                "You check a drafted itinerary with validate_travel_plan and report the findings. \
                 Hand off to planner when the plan needs changes.",
            ),
            feedback: FeedbackPrompts::default(),
            variables: HashMap::new(),
        }
    }
}

impl Prompts {
    /// Load prompts with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Self::default();

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string()).join("agents.toml");
            if custom_path.exists() {
                let content = std::fs::read_to_string(&custom_path)?;
                let custom: CustomPrompts = toml::from_str(&content)?;
                custom.apply(&mut prompts);
            }
        }

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        Ok(prompts)
    }

    /// Rendered system prompt for an agent.
    pub fn system_for(&self, agent: AgentId) -> String {
        let prompt = match agent {
            AgentId::Coordinator => &self.coordinator,
            AgentId::Planner => &self.planner,
            AgentId::LocationSearch => &self.location_search,
            AgentId::Calendar => &self.calendar,
            AgentId::Share => &self.share,
            AgentId::Verifier => &self.verifier,
        };
        let mut vars = HashMap::new();
        vars.insert("agent".to_string(), agent.to_string());
        self.render_with_custom(&prompt.system, &vars)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render with both provided variables and custom config variables.
    /// Provided variables take precedence.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = HashMap::new();
        merged.insert("app_name".to_string(), "Itinera".to_string());
        for (key, value) in &self.variables {
            merged.insert(key.clone(), value.clone());
        }
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }

    /// Render a feedback template from `(name, value)` pairs.
    pub fn render_feedback(&self, template: &str, pairs: &[(&str, String)]) -> String {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.render_with_custom(template, &vars)
    }
}

/// Partial overrides read from `agents.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CustomPrompts {
    coordinator: Option<AgentPrompt>,
    planner: Option<AgentPrompt>,
    location_search: Option<AgentPrompt>,
    calendar: Option<AgentPrompt>,
    share: Option<AgentPrompt>,
    verifier: Option<AgentPrompt>,
    feedback: Option<FeedbackPrompts>,
}

impl CustomPrompts {
    fn apply(self, prompts: &mut Prompts) {
        let slots = [
            (self.coordinator, &mut prompts.coordinator),
            (self.planner, &mut prompts.planner),
            (self.location_search, &mut prompts.location_search),
            (self.calendar, &mut prompts.calendar),
            (self.share, &mut prompts.share),
            (self.verifier, &mut prompts.verifier),
        ];
        for (custom, slot) in slots {
            if let Some(custom) = custom.filter(|c| !c.system.is_empty()) {
                *slot = custom;
            }
        }
        if let Some(feedback) = self.feedback {
            prompts.feedback = feedback;
        }
    }
}
