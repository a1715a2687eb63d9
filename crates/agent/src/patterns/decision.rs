//! Action decision: turn the latest thought into a tool call or a final answer.
//!
//! The model sees every tool with its parameter schema (including choice
//! sets) and must reply with one of two JSON shapes:
//!
//! ```json
//! {"action_type": "tool_call", "tool_name": "filesystem", "parameters": {"action": "list"}}
//! {"action_type": "final_answer", "answer": "..."}
//! ```
//!
//! A premature final answer gets one forced-tool retry. Anything that cannot
//! be parsed becomes a final answer explaining that no action was chosen.

use serde_json::{Map, Value};
use std::sync::Arc;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest};
use steward_core::tool::ToolMetadata;
use tracing::{debug, info, warn};

use super::outcome::AgentContext;
use crate::lenient::{self, LenientError};
use crate::planning::describe_tools;
use crate::state::{ActionKind, Scratchpad, Thought};

/// How many recent steps the decision prompt replays.
const CONTEXT_STEPS: usize = 3;

pub struct ActionDecider {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: Option<u32>,
    forced_tool_retry: bool,
}

impl ActionDecider {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
            forced_tool_retry: true,
        }
    }

    /// Whether a final answer is challenged once with a tool-only prompt.
    pub fn with_forced_tool_retry(mut self, enabled: bool) -> Self {
        self.forced_tool_retry = enabled;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Decide the next action. Never fails.
    pub async fn decide(
        &self,
        thought: &Thought,
        scratchpad: &Scratchpad,
        context: &AgentContext,
        tools: &[ToolMetadata],
    ) -> ActionKind {
        let user = user_prompt(thought, scratchpad);
        let first = match self.ask(system_prompt(context, tools, false), &user).await {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "Action decision failed, ending with a safe answer");
                return safe_exit(&e);
            }
        };

        let ActionKind::FinalAnswer { .. } = &first else {
            if let ActionKind::ToolCall { tool_name, .. } = &first {
                info!(tool = %tool_name, "Tool call decided");
            }
            return first;
        };
        if !self.forced_tool_retry || tools.is_empty() {
            info!("Final answer decided");
            return first;
        }

        debug!("Model chose a final answer, retrying once with tools required");
        match self.ask(system_prompt(context, tools, true), &user).await {
            Ok(retry @ ActionKind::ToolCall { .. }) => {
                info!("Forced retry produced a tool call");
                retry
            }
            Ok(_) | Err(_) => {
                info!("Final answer kept after forced retry");
                first
            }
        }
    }

    async fn ask(&self, system: String, user: &str) -> Result<ActionKind, LenientError> {
        let mut request = ProviderRequest::new(
            &self.model,
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(0.3)
        .json();
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }
        let raw = lenient::request_object(self.provider.as_ref(), request).await?;
        parse_decision(raw)
    }
}

/// Decode a decision object. `tool_call` is assumed when only a tool is named.
pub fn parse_decision(mut raw: Map<String, Value>) -> Result<ActionKind, LenientError> {
    lenient::canonicalize(&mut raw, "parameters");
    let action_type = lenient::str_field(&raw, &["action_type", "type"])
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if action_type == "final_answer" || action_type == "final" {
        let answer = lenient::str_field(&raw, &["answer", "final_answer", "content"])
            .ok_or(LenientError::MissingField("answer"))?;
        return Ok(ActionKind::FinalAnswer { answer });
    }

    let tool_name =
        lenient::str_field(&raw, &["tool_name"]).ok_or(LenientError::MissingField("tool_name"))?;
    let parameters = match raw.remove("parameters") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Ok(ActionKind::ToolCall {
        tool_name,
        parameters,
    })
}

fn safe_exit(error: &LenientError) -> ActionKind {
    ActionKind::FinalAnswer {
        answer: format!("I could not decide on a next action ({error}), so I am stopping here."),
    }
}

fn system_prompt(context: &AgentContext, tools: &[ToolMetadata], tools_required: bool) -> String {
    let mut prompt = format!(
        "You are an agent that uses tools to achieve the user's goal.\n\n\
         Goal: {goal}\n\n\
         Available tools:\n{tools}\n\
         Reply with exactly one JSON object:\n\
         1. Tool call: {{\"action_type\": \"tool_call\", \"tool_name\": \"name\", \"parameters\": {{\"param\": \"value\"}}}}\n\
         2. Final answer: {{\"action_type\": \"final_answer\", \"answer\": \"text\"}}\n\n\
         Use only the values listed under \"one of\" for restricted parameters.",
        goal = context.goal,
        tools = describe_tools(tools),
    );
    if tools_required {
        prompt.push_str(
            "\n\nA final answer is not allowed for this reply. The goal can be advanced \
             with the tools above: choose the most useful tool call.",
        );
    }
    prompt
}

fn user_prompt(thought: &Thought, scratchpad: &Scratchpad) -> String {
    format!(
        "Current thought: {}\n\nRecent progress:\n{}\n\nDecide the next action.",
        thought.content,
        scratchpad.get_latest_context(CONTEXT_STEPS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{
        FailingProvider, SequentialMockProvider, filesystem_metadata,
    };
    use serde_json::json;

    fn thought() -> Thought {
        let mut pad = Scratchpad::new("g");
        pad.add_thought("look at the desktop", 1, 0.8, vec![]).clone()
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn parse_accepts_aliases() {
        let action = parse_decision(obj(json!({
            "function_name": "filesystem",
            "args": {"action": "list", "path": "~/Desktop"}
        })))
        .unwrap();
        assert_eq!(
            action,
            ActionKind::ToolCall {
                tool_name: "filesystem".into(),
                parameters: obj(json!({"action": "list", "path": "~/Desktop"})),
            }
        );
    }

    #[test]
    fn parse_final_answer_and_missing_fields() {
        let action =
            parse_decision(obj(json!({"action_type": "final_answer", "answer": "done"}))).unwrap();
        assert_eq!(action, ActionKind::FinalAnswer { answer: "done".into() });

        assert!(parse_decision(obj(json!({"action_type": "tool_call"}))).is_err());
        assert!(parse_decision(obj(json!({"action_type": "final_answer"}))).is_err());
    }

    #[tokio::test]
    async fn tool_call_is_returned_and_prompt_lists_choices() {
        let provider = Arc::new(SequentialMockProvider::jsons([json!({
            "action_type": "tool_call",
            "tool_name": "filesystem",
            "parameters": {"action": "list", "path": "/tmp"}
        })]));
        let decider = ActionDecider::new(provider.clone(), "mock-model");
        let action = decider
            .decide(&thought(), &Scratchpad::new("g"), &AgentContext::new("g"), &[
                filesystem_metadata(),
            ])
            .await;

        assert!(matches!(action, ActionKind::ToolCall { ref tool_name, .. } if tool_name == "filesystem"));
        let requests = provider.requests();
        assert!(requests[0].json_mode);
        assert!(requests[0].messages[0].content.contains("one of: list, create_dir"));
    }

    #[tokio::test]
    async fn final_answer_gets_one_forced_retry() {
        let provider = Arc::new(SequentialMockProvider::jsons([
            json!({"action_type": "final_answer", "answer": "nothing to do"}),
            json!({"action_type": "tool_call", "tool_name": "filesystem", "parameters": {"path": "/tmp"}}),
        ]));
        let decider = ActionDecider::new(provider.clone(), "mock-model");
        let action = decider
            .decide(&thought(), &Scratchpad::new("g"), &AgentContext::new("g"), &[
                filesystem_metadata(),
            ])
            .await;

        assert!(matches!(action, ActionKind::ToolCall { .. }));
        assert_eq!(provider.call_count(), 2);
        assert!(provider.requests()[1].messages[0].content.contains("not allowed"));
    }

    #[tokio::test]
    async fn final_answer_kept_when_retry_insists() {
        let provider = Arc::new(SequentialMockProvider::jsons([
            json!({"action_type": "final_answer", "answer": "it is 3pm"}),
            json!({"action_type": "final_answer", "answer": "still 3pm"}),
        ]));
        let decider = ActionDecider::new(provider, "mock-model");
        let action = decider
            .decide(&thought(), &Scratchpad::new("g"), &AgentContext::new("g"), &[
                filesystem_metadata(),
            ])
            .await;
        assert_eq!(action, ActionKind::FinalAnswer { answer: "it is 3pm".into() });
    }

    #[tokio::test]
    async fn retry_disabled_accepts_first_answer() {
        let provider = Arc::new(SequentialMockProvider::jsons([json!({
            "action_type": "final_answer", "answer": "done"
        })]));
        let decider = ActionDecider::new(provider.clone(), "mock-model").with_forced_tool_retry(false);
        decider
            .decide(&thought(), &Scratchpad::new("g"), &AgentContext::new("g"), &[
                filesystem_metadata(),
            ])
            .await;
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_safe_exit() {
        let provider = Arc::new(SequentialMockProvider::texts(["I think we should list files"]));
        let decider = ActionDecider::new(provider, "mock-model");
        let action = decider
            .decide(&thought(), &Scratchpad::new("g"), &AgentContext::new("g"), &[])
            .await;
        assert!(matches!(action, ActionKind::FinalAnswer { ref answer } if answer.contains("could not decide")));

        let decider = ActionDecider::new(Arc::new(FailingProvider), "mock-model");
        let action = decider
            .decide(&thought(), &Scratchpad::new("g"), &AgentContext::new("g"), &[])
            .await;
        assert!(matches!(action, ActionKind::FinalAnswer { .. }));
    }
}
