//! Planning engine: turns a goal into an [`ExecutionPlan`].
//!
//! One LLM call drafts the plan, the static corrector fixes what it can,
//! and an optional second LLM call reviews the result. Any failure along
//! the way degrades to a single reasoning step; this never returns an error.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use steward_config::PlanningConfig;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest};
use steward_core::tool::ToolMetadata;
use tracing::{debug, info, warn};

use super::plan::{ExecutionPlan, PlanStep, StepActionType, TaskPriority};
use super::validator::{PlanCorrector, PlanValidator};
use crate::lenient::{self, LenientError};
use crate::patterns::outcome::AgentContext;

const PLAN_SCHEMA: &str = r#"{
  "strategy": "sequential|parallel|adaptive",
  "steps": [
    {
      "step_id": "step_1",
      "description": "what this step does",
      "action_type": "tool_call|reasoning|final_answer",
      "tool_name": "tool name when action_type is tool_call",
      "tool_params": {"param": "value"},
      "dependencies": [],
      "priority": 3,
      "estimated_duration": 30.0,
      "success_criteria": "how to tell it worked",
      "failure_recovery": "what to do if it fails"
    }
  ]
}"#;

/// Render the tool catalog for a prompt: name, description and parameter schema.
pub fn describe_tools(tools: &[ToolMetadata]) -> String {
    if tools.is_empty() {
        return "(no tools available)".into();
    }
    let mut out = String::new();
    for tool in tools {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
        for p in &tool.parameters {
            let _ = write!(
                out,
                "    - {} ({}{}): {}",
                p.name,
                p.param_type.as_str(),
                if p.required { ", required" } else { "" },
                p.description
            );
            if let Some(choices) = &p.choices {
                let _ = write!(out, " [one of: {}]", choices.join(", "));
            }
            if let Some(default) = &p.default {
                let _ = write!(out, " (default: {default})");
            }
            out.push('\n');
        }
    }
    out
}

/// Builds execution plans with an LLM.
pub struct PlanningEngine {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: Option<u32>,
    validation_pass: bool,
    max_steps: usize,
    validator: PlanValidator,
    corrector: PlanCorrector,
}

impl PlanningEngine {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
            validation_pass: true,
            max_steps: 10,
            validator: PlanValidator::new(),
            corrector: PlanCorrector::new(),
        }
    }

    pub fn with_config(mut self, config: &PlanningConfig) -> Self {
        self.validation_pass = config.validation_pass;
        self.max_steps = config.max_steps;
        self
    }

    /// Enable or disable the second LLM review.
    pub fn with_validation_pass(mut self, enabled: bool) -> Self {
        self.validation_pass = enabled;
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Build a plan for `goal`. Never fails.
    pub async fn create_execution_plan(
        &self,
        goal: &str,
        context: &AgentContext,
        tools: &[ToolMetadata],
    ) -> ExecutionPlan {
        info!(goal = %goal, tools = tools.len(), "Creating execution plan");

        let prompt = self.planning_prompt(goal, context, tools);
        let raw = match self.ask(prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Plan generation failed, using fallback plan");
                return Self::fallback_plan(goal);
            }
        };

        let mut raw = self.prepare(raw, goal);
        if self.validation_pass {
            if let Some(improved) = self.review(goal, &raw, tools).await {
                info!("Validation pass replaced the plan");
                raw = improved;
            }
        }

        let plan_id = format!("plan_{}", Utc::now().timestamp());
        match ExecutionPlan::from_raw(plan_id, goal, &raw) {
            Some(plan) => {
                info!(plan_id = %plan.plan_id, steps = plan.len(), "Execution plan ready");
                plan
            }
            None => {
                warn!("Plan had no usable steps, using fallback plan");
                Self::fallback_plan(goal)
            }
        }
    }

    /// A single reasoning step restating the goal.
    pub fn fallback_plan(goal: &str) -> ExecutionPlan {
        let mut step = PlanStep::new("step_1", format!("Work toward the goal: {goal}"))
            .with_action_type(StepActionType::Reasoning)
            .with_priority(TaskPriority::High)
            .with_duration(60.0);
        step.success_criteria = "the goal is achieved".into();
        step.failure_recovery = "try a different approach".into();
        ExecutionPlan::new(format!("fallback_{}", Utc::now().timestamp()), goal).with_steps(vec![step])
    }

    async fn ask(&self, prompt: String) -> Result<Map<String, Value>, LenientError> {
        let mut request = ProviderRequest::new(&self.model, vec![Message::user(prompt)])
            .with_temperature(0.3)
            .json();
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }
        lenient::request_object(self.provider.as_ref(), request).await
    }

    /// Canonicalize step fields, apply static corrections, then cap the step count.
    fn prepare(&self, mut raw: Map<String, Value>, goal: &str) -> Map<String, Value> {
        // Some models wrap the plan: {"plan": {...}}
        if !raw.contains_key("steps") {
            if let Some(Value::Object(inner)) = raw.remove("plan") {
                raw = inner;
            }
        }
        if let Some(Value::Array(steps)) = raw.get_mut("steps") {
            steps.retain(Value::is_object);
            for step in steps.iter_mut().filter_map(Value::as_object_mut) {
                lenient::canonicalize(step, "tool_params");
                if !step.contains_key("action_type") && step.contains_key("tool_name") {
                    step.insert("action_type".into(), Value::String("tool_call".into()));
                }
            }
        }
        let mut corrected = self.corrector.correct(&raw, goal);
        self.cap_steps(&mut corrected);
        corrected
    }

    /// Truncate to `max_steps` and drop dependencies on steps that were cut.
    fn cap_steps(&self, raw: &mut Map<String, Value>) {
        let Some(Value::Array(steps)) = raw.get_mut("steps") else {
            return;
        };
        if steps.len() <= self.max_steps {
            return;
        }
        warn!(steps = steps.len(), max = self.max_steps, "Plan truncated");
        steps.truncate(self.max_steps);
        let kept: HashSet<String> = steps
            .iter()
            .filter_map(|s| s.get("step_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        for step in steps.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(Value::Array(deps)) = step.get_mut("dependencies") {
                deps.retain(|d| d.as_str().is_some_and(|id| kept.contains(id)));
            }
        }
    }

    /// Second LLM pass. `None` keeps the current plan.
    async fn review(
        &self,
        goal: &str,
        raw: &Map<String, Value>,
        tools: &[ToolMetadata],
    ) -> Option<Map<String, Value>> {
        let report = self.validator.validate(raw, goal);
        let issues = if report.issues.is_empty() {
            "none".to_string()
        } else {
            report
                .issues
                .iter()
                .map(|i| format!("- {i}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let plan_json = serde_json::to_string_pretty(raw).unwrap_or_default();
        let prompt = format!(
            "Review this execution plan before it runs.\n\n\
             Goal: {goal}\n\n\
             Available tools:\n{tools}\n\
             Plan:\n{plan_json}\n\n\
             Static check findings:\n{issues}\n\n\
             Check for:\n\
             1. Abstract placeholders such as <file path> standing in for values not yet discovered.\n\
             2. Missing exploration: files must be listed or searched before they are deleted, moved or copied.\n\
             3. Tools or parameters that do not match the catalog above.\n\n\
             If the plan is fine, reply {{\"verdict\": \"pass\"}}.\n\
             Otherwise reply {{\"verdict\": \"improve\", \"plan\": <the full improved plan>}} using this schema:\n{PLAN_SCHEMA}",
            tools = describe_tools(tools),
        );

        let reply = match self.ask(prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "Validation pass unavailable, keeping plan");
                return None;
            }
        };

        let verdict = reply
            .get("verdict")
            .and_then(Value::as_str)
            .map(|v| v.trim().to_lowercase());
        if verdict.as_deref() == Some("pass") {
            debug!("Validation pass accepted the plan");
            return None;
        }
        let improved = if let Some(Value::Object(plan)) = reply.get("plan") {
            plan.clone()
        } else if reply.contains_key("steps") {
            reply
        } else {
            return None;
        };
        let has_steps = improved
            .get("steps")
            .and_then(Value::as_array)
            .is_some_and(|s| s.iter().any(Value::is_object));
        has_steps.then(|| self.prepare(improved, goal))
    }

    fn planning_prompt(&self, goal: &str, context: &AgentContext, tools: &[ToolMetadata]) -> String {
        format!(
            "Write a detailed execution plan for the goal below.\n\n\
             Goal: {goal}\n\n\
             Available tools:\n{tools}\n\
             Context: {limits}\n\n\
             Rules for file work:\n\
             1. The first step always lists the target path with the filesystem tool.\n\
             2. Tell files and folders apart; never assume something exists.\n\
             3. Base later steps on what exploration actually finds.\n\n\
             For each step give a description, the tool (if any), an estimated duration in seconds, \
             success criteria, a recovery plan and a priority from 1 to 4 (4 is highest). \
             List dependencies between steps by step_id. Use at most {max} steps.\n\n\
             Reply with JSON only, exactly in this shape. Use \"tool_name\" and \"tool_params\", \
             not \"function_name\" or \"args\":\n{PLAN_SCHEMA}",
            tools = describe_tools(tools),
            limits = context.limits_summary(),
            max = self.max_steps,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{
        FailingProvider, MockToolExecutor, SequentialMockProvider, make_error_response,
        make_text_response,
    };
    use crate::planning::plan::TaskStatus;
    use crate::planning::validator::EXPLORATION_STEP_ID;
    use serde_json::json;
    use steward_core::tool::ToolExecutor;

    fn tools() -> Vec<ToolMetadata> {
        MockToolExecutor::with_standard_tools().catalog()
    }

    fn ctx(goal: &str) -> AgentContext {
        AgentContext::new(goal)
    }

    fn screenshot_plan() -> Value {
        json!({
            "strategy": "sequential",
            "steps": [
                {"step_id": "step_1", "description": "think about it", "action_type": "reasoning"},
                {"step_id": "step_2", "description": "delete screenshots", "action_type": "tool_call",
                 "function_name": "filesystem",
                 "args": [{"action": "delete_file", "path": "<식별된_스크린샷_파일_전체_경로>"}],
                 "dependencies": ["step_1"], "priority": 3}
            ]
        })
    }

    #[tokio::test]
    async fn plan_is_corrected_before_use() {
        let provider = Arc::new(SequentialMockProvider::jsons([
            screenshot_plan(),
            json!({"verdict": "pass"}),
        ]));
        let engine = PlanningEngine::new(provider.clone(), "mock");
        let goal = "delete screenshot files from desktop";
        let plan = engine.create_execution_plan(goal, &ctx(goal), &tools()).await;

        assert!(plan.plan_id.starts_with("plan_"));
        let ids: Vec<&str> = plan.steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["step_1", EXPLORATION_STEP_ID, "step_2"]);

        let delete = plan.step("step_2").unwrap();
        assert_eq!(delete.tool_name.as_deref(), Some("filesystem"));
        assert_eq!(delete.tool_action(), Some("delete"));
        assert!(delete.dependencies.contains(&EXPLORATION_STEP_ID.to_string()));
        assert_eq!(provider.call_count(), 2);

        let requests = provider.requests();
        assert!(requests[0].json_mode);
        assert!(requests[0].messages[0].content.contains("mcp_doctor"));
    }

    #[tokio::test]
    async fn validation_pass_replaces_plan_wholesale() {
        let improved = json!({
            "verdict": "improve",
            "plan": {"strategy": "adaptive", "steps": [
                {"step_id": "look", "action_type": "tool_call", "tool_name": "system_explorer",
                 "tool_params": {"action": "get_structure", "path": "~/Desktop"}},
                {"step_id": "answer", "action_type": "final_answer", "dependencies": ["look"]}
            ]}
        });
        let provider = Arc::new(SequentialMockProvider::jsons([screenshot_plan(), improved]));
        let engine = PlanningEngine::new(provider, "mock");
        let plan = engine.create_execution_plan("show my desktop", &ctx("x"), &tools()).await;

        let ids: Vec<&str> = plan.steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["look", "answer"]);
    }

    #[tokio::test]
    async fn validation_pass_can_be_disabled() {
        let provider = Arc::new(SequentialMockProvider::jsons([json!({"steps": [
            {"step_id": "a", "action_type": "reasoning", "description": "think"}
        ]})]));
        let engine = PlanningEngine::new(provider.clone(), "mock").with_validation_pass(false);
        let plan = engine.create_execution_plan("hello", &ctx("hello"), &tools()).await;
        assert_eq!(plan.len(), 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn unparseable_validation_reply_keeps_plan() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response(&json!({"steps": [{"step_id": "a", "description": "x"}]}).to_string()),
            make_text_response("looks good to me"),
        ]));
        let engine = PlanningEngine::new(provider, "mock");
        let plan = engine.create_execution_plan("hello", &ctx("hello"), &tools()).await;
        assert_eq!(plan.steps()[0].step_id, "a");
    }

    #[tokio::test]
    async fn garbage_falls_back_to_single_reasoning_step() {
        let provider = Arc::new(SequentialMockProvider::texts(["I cannot plan this, sorry."]));
        let engine = PlanningEngine::new(provider, "mock");
        let plan = engine.create_execution_plan("sort my notes", &ctx("x"), &tools()).await;

        assert!(plan.plan_id.starts_with("fallback_"));
        assert_eq!(plan.len(), 1);
        let step = &plan.steps()[0];
        assert_eq!(step.action_type, StepActionType::Reasoning);
        assert_eq!(step.priority, TaskPriority::High);
        assert!((step.estimated_duration - 60.0).abs() < f64::EPSILON);
        assert!(step.description.contains("sort my notes"));
        assert_eq!(step.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn provider_errors_fall_back() {
        let engine = PlanningEngine::new(Arc::new(FailingProvider), "mock");
        let plan = engine.create_execution_plan("g", &ctx("g"), &[]).await;
        assert!(plan.plan_id.starts_with("fallback_"));

        let provider = Arc::new(SequentialMockProvider::new(vec![make_error_response()]));
        let engine = PlanningEngine::new(provider, "mock");
        let plan = engine.create_execution_plan("g", &ctx("g"), &[]).await;
        assert!(plan.plan_id.starts_with("fallback_"));
    }

    #[tokio::test]
    async fn empty_step_list_falls_back() {
        let provider = Arc::new(SequentialMockProvider::jsons([json!({"steps": []})]));
        let engine = PlanningEngine::new(provider, "mock").with_validation_pass(false);
        let plan = engine.create_execution_plan("g", &ctx("g"), &[]).await;
        assert!(plan.plan_id.starts_with("fallback_"));
    }

    #[tokio::test]
    async fn steps_are_capped() {
        let steps: Vec<Value> = (0..6)
            .map(|i| json!({"step_id": format!("s{i}"), "description": "x"}))
            .collect();
        let provider = Arc::new(SequentialMockProvider::jsons([json!({"plan": {"steps": steps}})]));
        let engine = PlanningEngine::new(provider, "mock")
            .with_validation_pass(false)
            .with_max_steps(4);
        let plan = engine.create_execution_plan("hello", &ctx("hello"), &[]).await;
        assert_eq!(plan.len(), 4);
    }

    #[tokio::test]
    async fn capping_after_correction_keeps_dependencies_resolvable() {
        let provider = Arc::new(SequentialMockProvider::jsons([json!({"steps": [
            {"step_id": "step_1", "description": "think", "action_type": "reasoning",
             "dependencies": ["step_3"]},
            {"step_id": "step_2", "description": "delete screenshots", "action_type": "tool_call",
             "tool_name": "filesystem",
             "tool_params": {"action": "delete", "path": "<식별된_스크린샷_파일_전체_경로>"},
             "dependencies": ["step_1"]},
            {"step_id": "step_3", "description": "report", "action_type": "final_answer"}
        ]})]));
        let engine = PlanningEngine::new(provider, "mock")
            .with_validation_pass(false)
            .with_max_steps(3);
        let goal = "delete screenshot files from desktop";
        let plan = engine.create_execution_plan(goal, &ctx(goal), &tools()).await;

        let ids: Vec<&str> = plan.steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["step_1", EXPLORATION_STEP_ID, "step_2"]);
        assert!(plan.steps().iter().all(|s| s.dependencies.iter().all(|d| plan.contains(d))));
        let next: Vec<&str> = plan.get_next_steps().iter().map(|s| s.step_id.as_str()).collect();
        assert!(next.contains(&"step_1"));
    }

    #[test]
    fn tool_catalog_lists_choices_and_defaults() {
        let text = describe_tools(&tools());
        assert!(text.contains("- filesystem:"));
        assert!(text.contains("one of: list, create_dir, copy, move, delete"));
        assert!(text.contains("default: \"list\""));
        assert_eq!(describe_tools(&[]), "(no tools available)");
    }
}
