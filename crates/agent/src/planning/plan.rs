//! Execution plans: a dependency graph of steps toward one goal.
//!
//! Steps are held in an arena owned by [`ExecutionPlan`] and refer to each
//! other by id. Every status change goes through plan methods so that the
//! executor and the adapter never hold aliasing references to a step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::lenient;

/// Status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// Priority of a plan step; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl TaskPriority {
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Critical,
        }
    }

    /// Accepts `1..=4` or a name such as `"high"`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(|f| Self::from_level(f.round() as i64)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "low" | "낮음" => Some(Self::Low),
                "medium" | "normal" | "중간" => Some(Self::Medium),
                "high" | "높음" => Some(Self::High),
                "critical" | "urgent" | "긴급" => Some(Self::Critical),
                other => other.parse::<i64>().ok().map(Self::from_level),
            },
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

/// What executing a step means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepActionType {
    ToolCall,
    Reasoning,
    FinalAnswer,
}

impl StepActionType {
    fn parse(raw: Option<&str>, has_tool: bool) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("tool_call" | "tool" | "tool_use") => Self::ToolCall,
            Some("final_answer" | "answer") => Self::FinalAnswer,
            Some(_) => Self::Reasoning,
            None if has_tool => Self::ToolCall,
            None => Self::Reasoning,
        }
    }
}

/// Advisory execution strategy tag.
///
/// The engine always runs one runnable step at a time regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
    Adaptive,
}

impl ExecutionStrategy {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "parallel" => Self::Parallel,
            "adaptive" => Self::Adaptive,
            _ => Self::Sequential,
        }
    }
}

/// A node in the plan graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub description: String,
    pub action_type: StepActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_params: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub priority: TaskPriority,
    /// Seconds.
    pub estimated_duration: f64,
    #[serde(default)]
    pub success_criteria: String,
    #[serde(default)]
    pub failure_recovery: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const DEFAULT_STEP_DURATION: f64 = 30.0;

impl PlanStep {
    pub fn new(step_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            description: description.into(),
            action_type: StepActionType::Reasoning,
            tool_name: None,
            tool_params: Map::new(),
            dependencies: Vec::new(),
            priority: TaskPriority::Medium,
            estimated_duration: DEFAULT_STEP_DURATION,
            success_criteria: String::new(),
            failure_recovery: String::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Turn this step into a tool call.
    pub fn with_tool(mut self, tool_name: impl Into<String>, params: Map<String, Value>) -> Self {
        self.action_type = StepActionType::ToolCall;
        self.tool_name = Some(tool_name.into());
        self.tool_params = params;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.estimated_duration = seconds;
        self
    }

    pub fn with_action_type(mut self, action_type: StepActionType) -> Self {
        self.action_type = action_type;
        self
    }

    /// The `action` parameter of a tool call, if present.
    pub fn tool_action(&self) -> Option<&str> {
        self.tool_params.get("action").and_then(Value::as_str)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Build a step from a raw JSON object; `index` seeds a missing id.
    ///
    /// Field aliases are canonicalized first, so the object may use
    /// `function_name` / `args` spellings.
    pub fn from_raw(raw: &Map<String, Value>, index: usize) -> Self {
        let mut obj = raw.clone();
        lenient::canonicalize(&mut obj, "tool_params");

        let tool_name = lenient::str_field(&obj, &["tool_name"]);
        let action_type = StepActionType::parse(
            obj.get("action_type").and_then(Value::as_str),
            tool_name.is_some(),
        );
        let step_id = lenient::str_field(&obj, &["step_id", "id"])
            .unwrap_or_else(|| format!("step_{}", index + 1));
        let description =
            lenient::str_field(&obj, &["description", "title"]).unwrap_or_else(|| step_id.clone());

        Self {
            step_id,
            description,
            action_type,
            tool_name,
            tool_params: obj
                .get("tool_params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            dependencies: lenient::string_list(&obj, "dependencies"),
            priority: obj
                .get("priority")
                .and_then(TaskPriority::from_value)
                .unwrap_or(TaskPriority::Medium),
            estimated_duration: lenient::f64_field(&obj, "estimated_duration")
                .filter(|d| *d > 0.0)
                .unwrap_or(DEFAULT_STEP_DURATION),
            success_criteria: lenient::str_field(&obj, &["success_criteria"]).unwrap_or_default(),
            failure_recovery: lenient::str_field(&obj, &["failure_recovery"]).unwrap_or_default(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// A dependency-ordered plan for one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub goal: String,
    steps: Vec<PlanStep>,
    pub strategy: ExecutionStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(plan_id: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan_id.into(),
            goal: goal.into(),
            steps: Vec::new(),
            strategy: ExecutionStrategy::Sequential,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_steps(mut self, steps: Vec<PlanStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build a plan from a raw `{strategy, steps: [...]}` object.
    ///
    /// Returns `None` when there is no usable step list.
    pub fn from_raw(plan_id: impl Into<String>, goal: &str, raw: &Map<String, Value>) -> Option<Self> {
        let steps: Vec<PlanStep> = raw
            .get("steps")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(Value::as_object)
            .enumerate()
            .map(|(i, obj)| PlanStep::from_raw(obj, i))
            .collect();
        if steps.is_empty() {
            return None;
        }
        let strategy = raw
            .get("strategy")
            .and_then(Value::as_str)
            .map(ExecutionStrategy::parse)
            .unwrap_or_default();
        Some(Self::new(plan_id, goal).with_steps(steps).with_strategy(strategy))
    }

    // ── Queries ──

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.step(step_id).is_some()
    }

    /// Pending steps whose every dependency is completed, highest priority first.
    ///
    /// Ties keep plan order. A dependency id that does not resolve to a step
    /// in this plan is never satisfied.
    pub fn get_next_steps(&self) -> Vec<&PlanStep> {
        let mut ready: Vec<&PlanStep> = self
            .steps
            .iter()
            .filter(|s| s.is_pending())
            .filter(|s| {
                s.dependencies.iter().all(|dep| {
                    self.step(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
            })
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready
    }

    /// Every step is completed or skipped.
    pub fn is_completed(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, TaskStatus::Completed | TaskStatus::Skipped))
    }

    /// Any step has failed.
    pub fn has_failed(&self) -> bool {
        self.steps.iter().any(|s| s.status == TaskStatus::Failed)
    }

    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for s in &self.steps {
            *counts.entry(s.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Recorded results of completed steps, keyed by step id.
    pub fn completed_results(&self) -> HashMap<String, Value> {
        self.steps
            .iter()
            .filter(|s| s.status == TaskStatus::Completed)
            .filter_map(|s| s.result.clone().map(|r| (s.step_id.clone(), r)))
            .collect()
    }

    // ── Mutation ──

    /// Apply `f` to the step with `step_id`. Returns false if there is none.
    pub fn update_step<F>(&mut self, step_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut PlanStep),
    {
        match self.steps.iter_mut().find(|s| s.step_id == step_id) {
            Some(step) => {
                f(step);
                self.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Apply `f` to every step matching `pred`. Returns how many matched.
    pub fn update_where<P, F>(&mut self, pred: P, mut f: F) -> usize
    where
        P: Fn(&PlanStep) -> bool,
        F: FnMut(&mut PlanStep),
    {
        let mut n = 0;
        for step in self.steps.iter_mut().filter(|s| pred(s)) {
            f(step);
            n += 1;
        }
        if n > 0 {
            self.updated_at = Utc::now();
        }
        n
    }

    pub fn mark_in_progress(&mut self, step_id: &str) -> bool {
        self.update_step(step_id, |s| s.status = TaskStatus::InProgress)
    }

    pub fn complete_step(&mut self, step_id: &str, result: Value) -> bool {
        self.update_step(step_id, |s| {
            s.status = TaskStatus::Completed;
            s.result = Some(result);
            s.error = None;
        })
    }

    pub fn fail_step(&mut self, step_id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update_step(step_id, |s| {
            s.status = TaskStatus::Failed;
            s.error = Some(error);
        })
    }

    pub fn skip_step(&mut self, step_id: &str) -> bool {
        self.update_step(step_id, |s| s.status = TaskStatus::Skipped)
    }

    /// Back to pending with the error cleared.
    pub fn reset_step(&mut self, step_id: &str) -> bool {
        self.update_step(step_id, |s| {
            s.status = TaskStatus::Pending;
            s.error = None;
        })
    }

    pub fn push_step(&mut self, step: PlanStep) {
        self.steps.push(step);
        self.updated_at = Utc::now();
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = goal.into();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_step_plan() -> ExecutionPlan {
        ExecutionPlan::new("plan_1", "g").with_steps(vec![
            PlanStep::new("a", "first"),
            PlanStep::new("b", "second").with_dependencies(["a"]),
            PlanStep::new("c", "third").with_dependencies(["a", "b"]),
        ])
    }

    fn assert_dependency_invariant(plan: &ExecutionPlan) {
        for s in plan.get_next_steps() {
            assert_eq!(s.status, TaskStatus::Pending);
            for d in &s.dependencies {
                assert_eq!(plan.step(d).unwrap().status, TaskStatus::Completed);
            }
        }
    }

    #[test]
    fn step_defaults() {
        let s = PlanStep::new("s", "d");
        assert_eq!(s.priority, TaskPriority::Medium);
        assert!((s.estimated_duration - 30.0).abs() < f64::EPSILON);
        assert_eq!(s.status, TaskStatus::Pending);
    }

    #[test]
    fn next_steps_respect_dependencies() {
        let mut plan = three_step_plan();
        let ids: Vec<&str> = plan.get_next_steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_dependency_invariant(&plan);

        plan.complete_step("a", json!("ok"));
        let ids: Vec<&str> = plan.get_next_steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_dependency_invariant(&plan);
    }

    #[test]
    fn failed_or_skipped_dependency_blocks() {
        let mut plan = three_step_plan();
        plan.fail_step("a", "boom");
        assert!(plan.get_next_steps().is_empty());
        plan.skip_step("a");
        // skipped is not completed
        assert!(plan.get_next_steps().is_empty());
    }

    #[test]
    fn unknown_dependency_never_satisfied() {
        let plan = ExecutionPlan::new("p", "g")
            .with_steps(vec![PlanStep::new("x", "x").with_dependencies(["ghost"])]);
        assert!(plan.get_next_steps().is_empty());
    }

    #[test]
    fn next_steps_ordered_by_priority() {
        let plan = ExecutionPlan::new("p", "g").with_steps(vec![
            PlanStep::new("low", "l").with_priority(TaskPriority::Low),
            PlanStep::new("crit", "c").with_priority(TaskPriority::Critical),
            PlanStep::new("med1", "m"),
            PlanStep::new("med2", "m"),
        ]);
        let ids: Vec<&str> = plan.get_next_steps().iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["crit", "med1", "med2", "low"]);
    }

    #[test]
    fn completion_flips_on_last_step() {
        let mut plan = three_step_plan();
        assert!(!plan.is_completed());
        plan.complete_step("a", json!(1));
        assert!(!plan.is_completed());
        plan.complete_step("b", json!(2));
        assert!(!plan.is_completed());
        plan.complete_step("c", json!(3));
        assert!(plan.is_completed());
    }

    #[test]
    fn skipped_counts_as_done_and_failed_is_detected() {
        let mut plan = three_step_plan();
        plan.complete_step("a", json!(1));
        plan.skip_step("b");
        plan.fail_step("c", "nope");
        assert!(plan.has_failed());
        assert!(!plan.is_completed());
        plan.skip_step("c");
        assert!(plan.is_completed());
        assert!(!plan.has_failed());
    }

    #[test]
    fn reset_clears_error() {
        let mut plan = three_step_plan();
        plan.fail_step("a", "boom");
        assert_eq!(plan.step("a").unwrap().error.as_deref(), Some("boom"));
        plan.reset_step("a");
        let a = plan.step("a").unwrap();
        assert_eq!(a.status, TaskStatus::Pending);
        assert!(a.error.is_none());
    }

    #[test]
    fn update_unknown_step_is_noop() {
        let mut plan = three_step_plan();
        assert!(!plan.skip_step("zzz"));
        assert_eq!(plan.count(TaskStatus::Pending), 3);
    }

    #[test]
    fn priority_parsing() {
        assert_eq!(TaskPriority::from_value(&json!(4)), Some(TaskPriority::Critical));
        assert_eq!(TaskPriority::from_value(&json!(9)), Some(TaskPriority::Critical));
        assert_eq!(TaskPriority::from_value(&json!("high")), Some(TaskPriority::High));
        assert_eq!(TaskPriority::from_value(&json!("2")), Some(TaskPriority::Medium));
        assert_eq!(TaskPriority::from_value(&json!(null)), None);
        assert_eq!(TaskPriority::High.level(), 3);
    }

    #[test]
    fn from_raw_with_aliases() {
        let raw = json!({
            "strategy": "adaptive",
            "steps": [
                {"step_id": "step_1", "description": "look", "action_type": "tool_call",
                 "function_name": "filesystem", "args": [{"action": "list", "path": "~/Desktop"}],
                 "priority": 4, "estimated_duration": 10},
                {"description": "think", "dependencies": "step_1"}
            ]
        });
        let plan = ExecutionPlan::from_raw("plan_x", "g", raw.as_object().unwrap()).unwrap();
        assert_eq!(plan.strategy, ExecutionStrategy::Adaptive);
        assert_eq!(plan.len(), 2);
        let s1 = plan.step("step_1").unwrap();
        assert_eq!(s1.tool_name.as_deref(), Some("filesystem"));
        assert_eq!(s1.tool_action(), Some("list"));
        assert_eq!(s1.priority, TaskPriority::Critical);
        let s2 = plan.step("step_2").unwrap();
        assert_eq!(s2.action_type, StepActionType::Reasoning);
        assert_eq!(s2.dependencies, vec!["step_1".to_string()]);
    }

    #[test]
    fn from_raw_without_steps_is_none() {
        assert!(ExecutionPlan::from_raw("p", "g", json!({"steps": []}).as_object().unwrap()).is_none());
        assert!(ExecutionPlan::from_raw("p", "g", json!({"plan": 1}).as_object().unwrap()).is_none());
    }
}
