//! OpenAI chat-completions provider.
//!
//! Agent tools are offered as functions, next to two control functions:
//! `handoff` and `complete`. Whatever the model calls is rewritten into the
//! raw `StructuredOutput` shape; plain text replies are passed through as-is
//! and fail validation downstream.

use super::{MessageRole, ModelProvider, ModelRequest, ToolSchema};
use crate::agent::AgentId;
use crate::error::{ItineraError, Result};
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool,
    ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionObject,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

const HANDOFF_FUNCTION: &str = "handoff";
const COMPLETE_FUNCTION: &str = "complete";

/// Create an OpenAI client whose HTTP requests time out after `timeout`.
pub fn create_client(timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}

pub struct OpenAIModelProvider {
    client: Client<OpenAIConfig>,
    temperature: f32,
}

impl OpenAIModelProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client(timeout)?,
            temperature: 0.2,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_messages(&self, request: &ModelRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
        let system = format!(
            "{}\n\nTask context (JSON):\n{}",
            request.system_prompt,
            serde_json::to_string_pretty(&request.context)?
        );

        let mut messages: Vec<ChatCompletionRequestMessage> = vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| ItineraError::OpenAI(e.to_string()))?
            .into()];

        for message in &request.messages {
            let built: ChatCompletionRequestMessage = match message.role {
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map_err(|e| ItineraError::OpenAI(e.to_string()))?
                    .into(),
                MessageRole::User => user_message(message.content.clone())?,
                MessageRole::Tool => user_message(format!("Tool result:\n{}", message.content))?,
                MessageRole::Feedback => user_message(format!("[engine] {}", message.content))?,
            };
            messages.push(built);
        }

        Ok(messages)
    }
}

fn user_message(content: String) -> Result<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(content)
        .build()
        .map_err(|e| ItineraError::OpenAI(e.to_string()))?
        .into())
}

fn function(name: &str, description: &str, parameters: Value) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(parameters),
            strict: None,
        },
    }
}

/// Agent tools plus the two control functions.
fn function_definitions(request: &ModelRequest) -> Vec<ChatCompletionTool> {
    let routes: Vec<String> = request.routes.iter().map(|r| r.to_string()).collect();
    let agents: Vec<&str> = AgentId::ALL.iter().map(|a| a.as_str()).collect();

    let mut tools: Vec<ChatCompletionTool> = request
        .tools
        .iter()
        .map(|t: &ToolSchema| function(&t.name, &t.description, t.parameters.clone()))
        .collect();

    tools.push(function(
        HANDOFF_FUNCTION,
        "Transfer control to another agent. Omit target to use your default next step; \
         list several candidates when more than one is equally valid.",
        json!({
            "type": "object",
            "properties": {
                "target": {"type": "string", "enum": routes},
                "candidates": {"type": "array", "items": {"type": "string", "enum": agents}},
                "payload": {"type": "object", "description": "Data passed to the next agent"},
                "reason": {"type": "string"}
            }
        }),
    ));
    tools.push(function(
        COMPLETE_FUNCTION,
        "Finish your task and report the result.",
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "payload": {"type": "object"}
            },
            "required": ["text"]
        }),
    ));

    tools
}

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Rewrite a chat reply into the raw structured-output shape.
fn to_structured(tool_calls: &[ChatCompletionMessageToolCall], content: Option<&str>) -> Value {
    if let Some(call) = tool_calls
        .iter()
        .find(|c| c.function.name == HANDOFF_FUNCTION || c.function.name == COMPLETE_FUNCTION)
    {
        let mut args = parse_arguments(&call.function.arguments);
        let kind = if call.function.name == HANDOFF_FUNCTION {
            "handoff"
        } else {
            "completion"
        };
        if let Some(obj) = args.as_object_mut() {
            obj.insert("kind".to_string(), json!(kind));
        }
        return args;
    }

    if !tool_calls.is_empty() {
        let calls: Vec<Value> = tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "name": c.function.name,
                    "arguments": parse_arguments(&c.function.arguments),
                })
            })
            .collect();
        return json!({"kind": "tool_calls", "calls": calls});
    }

    let text = content.unwrap_or_default();
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl ModelProvider for OpenAIModelProvider {
    #[instrument(skip(self, request), fields(agent = %request.agent, model = %request.model))]
    async fn generate(&self, request: &ModelRequest) -> Result<Value> {
        let chat = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages(self.build_messages(request)?)
            .tools(function_definitions(request))
            .temperature(self.temperature)
            .build()
            .map_err(|e| ItineraError::OpenAI(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat)
            .await
            .map_err(|e| ItineraError::OpenAI(format!("Chat API error: {}", e)))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| ItineraError::OpenAI("No response from model".to_string()))?;

        let tool_calls = choice.message.tool_calls.clone().unwrap_or_default();
        let output = to_structured(&tool_calls, choice.message.content.as_deref());
        debug!("Model output: {}", output);
        Ok(output)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RouteTarget;
    use async_openai::types::FunctionCall;

    fn call(id: &str, name: &str, arguments: &str) -> ChatCompletionMessageToolCall {
        ChatCompletionMessageToolCall {
            id: id.to_string(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn test_handoff_function_becomes_handoff() {
        let calls = vec![call("c1", "handoff", r#"{"target": "planner", "payload": {"days": 4}}"#)];
        let output = to_structured(&calls, None);
        assert_eq!(output["kind"], "handoff");
        assert_eq!(output["target"], "planner");
    }

    #[test]
    fn test_tool_calls_keep_ids() {
        let calls = vec![
            call("c1", "search_places", r#"{"query": "Gyeongbokgung"}"#),
            call("c2", "search_places", r#"{"query": "Bukchon"}"#),
        ];
        let output = to_structured(&calls, None);
        assert_eq!(output["kind"], "tool_calls");
        assert_eq!(output["calls"][1]["id"], "c2");
        assert_eq!(output["calls"][1]["arguments"]["query"], "Bukchon");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let output = to_structured(&[], Some("I think we need a search"));
        assert!(output.is_string());
    }

    #[test]
    fn test_function_definitions_include_control_functions() {
        let request = ModelRequest {
            agent: AgentId::Planner,
            model: "gpt-4o-mini".to_string(),
            system_prompt: String::new(),
            context: json!({}),
            messages: vec![],
            tools: vec![],
            routes: vec![RouteTarget::Agent(AgentId::Coordinator)],
        };
        let names: Vec<String> = function_definitions(&request)
            .into_iter()
            .map(|t| t.function.name)
            .collect();
        assert_eq!(names, vec!["handoff", "complete"]);
    }
}
