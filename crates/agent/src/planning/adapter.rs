//! Dynamic plan adaptation.
//!
//! After every executed step the engine asks the adapter whether something
//! went wrong ([`DynamicAdapter::analyze_situation`]), how to respond
//! ([`DynamicAdapter::generate_adaptation_strategy`]) and then lets it mutate
//! the plan ([`DynamicAdapter::apply_adaptation`]). Events and actions are
//! kept as an append-only history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, PoisonError};
use steward_config::AdapterConfig;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest};
use tracing::{debug, info, warn};

use super::goal::GoalHierarchy;
use super::plan::{ExecutionPlan, PlanStep, TaskPriority, TaskStatus};
use super::validator::action_correction;
use crate::lenient;
use crate::patterns::outcome::AgentContext;

const RETRY_DURATION_FACTOR: f64 = 1.2;
const REPLAN_DURATION_FACTOR: f64 = 0.8;

/// What caused an adaptation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationTrigger {
    StepFailure,
    TimeoutRisk,
    ResourceConstraint,
    UnexpectedDuration,
    External,
}

/// The six ways the adapter can respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationStrategy {
    Retry,
    Alternative,
    Skip,
    Replan,
    AdjustGoal,
    Abort,
}

impl AdaptationStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "retry" => Some(Self::Retry),
            "alternative" => Some(Self::Alternative),
            "skip" => Some(Self::Skip),
            "replan" => Some(Self::Replan),
            "adjust_goal" => Some(Self::AdjustGoal),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Alternative => "alternative",
            Self::Skip => "skip",
            Self::Replan => "replan",
            Self::AdjustGoal => "adjust_goal",
            Self::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub event_id: String,
    pub trigger: AdaptationTrigger,
    pub description: String,
    pub affected_steps: Vec<String>,
    /// Plan status counts at detection time.
    pub context: Value,
    /// `1..=5`, 5 most severe.
    pub severity: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    #[default]
    StepModification,
    GoalChange,
    ParameterUpdate,
}

/// One structured change proposed alongside a strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Modification {
    #[serde(rename = "type", default)]
    pub kind: ModificationKind,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub new_goal: Option<String>,
    #[serde(default)]
    pub alternative_tool: Option<String>,
    #[serde(default)]
    pub alternative_params: Option<Map<String, Value>>,
}

impl Modification {
    pub fn step(target: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::StepModification,
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn goal_change(new_goal: impl Into<String>) -> Self {
        Self {
            kind: ModificationKind::GoalChange,
            new_goal: Some(new_goal.into()),
            ..Self::default()
        }
    }

    fn from_raw(raw: &Map<String, Value>) -> Self {
        let kind = match raw.get("type").and_then(Value::as_str) {
            Some("goal_change") => ModificationKind::GoalChange,
            Some("parameter_update") => ModificationKind::ParameterUpdate,
            _ => ModificationKind::StepModification,
        };
        Self {
            kind,
            target: lenient::str_field(raw, &["target", "step_id"]),
            action: lenient::str_field(raw, &["action"]),
            details: lenient::str_field(raw, &["details"]),
            new_goal: lenient::str_field(raw, &["new_goal"]),
            alternative_tool: lenient::str_field(raw, &["alternative_tool"]),
            alternative_params: raw.get("alternative_params").and_then(Value::as_object).cloned(),
        }
    }

    fn targets(&self, step_id: &str) -> bool {
        self.kind == ModificationKind::StepModification && self.target.as_deref() == Some(step_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationAction {
    pub action_id: String,
    pub strategy: AdaptationStrategy,
    pub description: String,
    pub modifications: Vec<Modification>,
    pub expected_impact: String,
    pub confidence: f64,
    pub estimated_time: f64,
}

impl AdaptationAction {
    pub fn new(strategy: AdaptationStrategy, modifications: Vec<Modification>) -> Self {
        Self {
            action_id: format!("action_{}", Utc::now().timestamp_millis()),
            strategy,
            description: format!("{} strategy", strategy.as_str()),
            modifications,
            expected_impact: String::new(),
            confidence: 0.8,
            estimated_time: 30.0,
        }
    }

    fn step_targets(&self) -> impl Iterator<Item = &str> {
        self.modifications
            .iter()
            .filter(|m| m.kind == ModificationKind::StepModification)
            .filter_map(|m| m.target.as_deref())
    }
}

/// What happened when a step ran, as the adapter sees it.
#[derive(Debug, Clone, Default)]
pub struct StepExecution {
    pub success: bool,
    pub error: Option<String>,
    /// Seconds this step took.
    pub execution_time: f64,
    /// Seconds since the goal attempt started.
    pub total_elapsed: f64,
    pub resource_exhausted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptationHistory {
    pub events: Vec<AdaptationEvent>,
    pub actions: Vec<AdaptationAction>,
}

impl AdaptationHistory {
    /// Events newer than `hours` ago.
    pub fn recent_events(&self, hours: i64) -> Vec<&AdaptationEvent> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.events.iter().filter(|e| e.timestamp > cutoff).collect()
    }
}

/// Detects trouble during plan execution and rewrites the plan in response.
pub struct DynamicAdapter {
    provider: Arc<dyn Provider>,
    model: String,
    config: AdapterConfig,
    history: Mutex<AdaptationHistory>,
}

impl DynamicAdapter {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            config: AdapterConfig::default(),
            history: Mutex::new(AdaptationHistory::default()),
        }
    }

    pub fn with_config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// A snapshot of every recorded event and action.
    pub fn history(&self) -> AdaptationHistory {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_event(&self, event: AdaptationEvent) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .push(event);
    }

    fn record_action(&self, action: AdaptationAction) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .actions
            .push(action);
    }

    // ── Detection ──

    /// Check the step that just ran for trouble.
    ///
    /// Failure (severity 4), timeout risk (3), resource exhaustion (3) and
    /// duration overrun (2) are evaluated independently; the most severe one
    /// is recorded and returned.
    pub fn analyze_situation(
        &self,
        plan: &ExecutionPlan,
        current_step: &PlanStep,
        execution: &StepExecution,
        context: &AgentContext,
    ) -> Option<AdaptationEvent> {
        let mut triggers: Vec<(AdaptationTrigger, String, u8)> = Vec::new();

        if !execution.success {
            triggers.push((
                AdaptationTrigger::StepFailure,
                format!(
                    "step failed: {}",
                    execution.error.as_deref().unwrap_or("unknown error")
                ),
                4,
            ));
        }

        let remaining_time = context.timeout_seconds as f64 - execution.total_elapsed;
        let remaining_steps = plan.count(TaskStatus::Pending);
        if remaining_steps > 0 {
            let per_step = remaining_time / remaining_steps as f64;
            if per_step < self.config.min_seconds_per_step {
                triggers.push((
                    AdaptationTrigger::TimeoutRisk,
                    format!("timeout risk: {per_step:.1}s left per remaining step"),
                    3,
                ));
            }
        }

        if execution.resource_exhausted {
            triggers.push((
                AdaptationTrigger::ResourceConstraint,
                "resource limit reached".into(),
                3,
            ));
        }

        let expected = current_step.estimated_duration;
        if execution.execution_time > expected * self.config.duration_overrun_factor {
            triggers.push((
                AdaptationTrigger::UnexpectedDuration,
                format!(
                    "step took {:.1}s (expected {expected:.1}s)",
                    execution.execution_time
                ),
                2,
            ));
        }

        // first of equal severity wins
        let (trigger, description, severity) = triggers
            .into_iter()
            .rev()
            .max_by_key(|(_, _, severity)| *severity)?;

        let sequence = self.history().events.len() + 1;
        let event = AdaptationEvent {
            event_id: format!("event_{}_{sequence}", Utc::now().timestamp()),
            trigger,
            description,
            affected_steps: vec![current_step.step_id.clone()],
            context: plan_status(plan),
            severity,
            timestamp: Utc::now(),
        };
        info!(
            trigger = ?event.trigger,
            severity = event.severity,
            step = %current_step.step_id,
            "Adaptation event detected: {}",
            event.description
        );
        self.record_event(event.clone());
        Some(event)
    }

    // ── Strategy ──

    /// Ask the model how to respond to `event`. Never fails.
    ///
    /// A failed call, unparseable reply or unknown strategy name takes the
    /// rule-based fallback.
    pub async fn generate_adaptation_strategy(
        &self,
        event: &AdaptationEvent,
        plan: &ExecutionPlan,
        hierarchy: Option<&GoalHierarchy>,
        context: &AgentContext,
    ) -> AdaptationAction {
        let prompt = strategy_prompt(event, plan, hierarchy, context);
        let request = ProviderRequest::new(&self.model, vec![Message::user(prompt)])
            .with_temperature(0.3)
            .json();

        let action = match lenient::request_object(self.provider.as_ref(), request).await {
            Ok(raw) => match parse_action(&raw) {
                Some(mut action) => {
                    let step_scoped = matches!(
                        action.strategy,
                        AdaptationStrategy::Retry
                            | AdaptationStrategy::Alternative
                            | AdaptationStrategy::Skip
                    );
                    if step_scoped && action.step_targets().next().is_none() {
                        action.modifications.extend(
                            event.affected_steps.iter().map(Modification::step),
                        );
                    }
                    action
                }
                None => {
                    warn!(strategy = ?raw.get("strategy"), "Unrecognized adaptation strategy, using rules");
                    Self::fallback_strategy(event)
                }
            },
            Err(e) => {
                warn!(error = %e, "Adaptation strategy request failed, using rules");
                Self::fallback_strategy(event)
            }
        };
        info!(strategy = action.strategy.as_str(), "Adaptation strategy chosen");
        self.record_action(action.clone());
        action
    }

    /// Skip on timeout risk, alternative on resource limits, replan at
    /// severity 4 and above, retry otherwise. Targets the event's steps.
    pub fn fallback_strategy(event: &AdaptationEvent) -> AdaptationAction {
        let strategy = match event.trigger {
            AdaptationTrigger::TimeoutRisk => AdaptationStrategy::Skip,
            AdaptationTrigger::ResourceConstraint => AdaptationStrategy::Alternative,
            _ if event.severity >= 4 => AdaptationStrategy::Replan,
            _ => AdaptationStrategy::Retry,
        };
        let modifications = event.affected_steps.iter().map(Modification::step).collect();
        let mut action = AdaptationAction::new(strategy, modifications);
        action.action_id = format!("fallback_{}", Utc::now().timestamp_millis());
        action.description = format!("default {} strategy", strategy.as_str());
        action.expected_impact = "ease the problem".into();
        action.confidence = 0.5;
        action
    }

    // ── Application ──

    /// Mutate `plan` according to `action`. Returns the ids of touched steps.
    pub fn apply_adaptation(
        &self,
        action: &AdaptationAction,
        plan: &mut ExecutionPlan,
        hierarchy: Option<&mut GoalHierarchy>,
    ) -> Vec<String> {
        info!(strategy = action.strategy.as_str(), plan_id = %plan.plan_id, "Applying adaptation");
        match action.strategy {
            AdaptationStrategy::Retry => apply_retry(action, plan),
            AdaptationStrategy::Alternative => apply_alternative(action, plan),
            AdaptationStrategy::Skip => apply_skip(action, plan),
            AdaptationStrategy::Replan => apply_replan(plan),
            AdaptationStrategy::AdjustGoal => apply_goal_adjustment(action, plan, hierarchy),
            AdaptationStrategy::Abort => {
                let skipped = pending_ids(plan);
                plan.update_where(|s| s.status == TaskStatus::Pending, |s| {
                    s.status = TaskStatus::Skipped
                });
                warn!(skipped = skipped.len(), "Plan execution aborted");
                skipped
            }
        }
    }
}

fn plan_status(plan: &ExecutionPlan) -> Value {
    json!({
        "total_steps": plan.len(),
        "completed": plan.count(TaskStatus::Completed),
        "pending": plan.count(TaskStatus::Pending),
        "failed": plan.count(TaskStatus::Failed),
    })
}

fn pending_ids(plan: &ExecutionPlan) -> Vec<String> {
    plan.steps()
        .iter()
        .filter(|s| s.status == TaskStatus::Pending)
        .map(|s| s.step_id.clone())
        .collect()
}

fn parse_action(raw: &Map<String, Value>) -> Option<AdaptationAction> {
    let strategy = AdaptationStrategy::parse(raw.get("strategy")?.as_str()?)?;
    let modifications = raw
        .get("modifications")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .map(Modification::from_raw)
        .collect();
    let mut action = AdaptationAction::new(strategy, modifications);
    if let Some(description) = lenient::str_field(raw, &["description"]) {
        action.description = description;
    }
    action.expected_impact = lenient::str_field(raw, &["expected_impact"]).unwrap_or_default();
    action.confidence = lenient::f64_field(raw, "confidence")
        .unwrap_or(0.8)
        .clamp(0.0, 1.0);
    action.estimated_time = lenient::f64_field(raw, "estimated_time").unwrap_or(30.0);
    Some(action)
}

fn apply_retry(action: &AdaptationAction, plan: &mut ExecutionPlan) -> Vec<String> {
    let mut touched = Vec::new();
    for target in action.step_targets() {
        let failed = plan
            .step(target)
            .is_some_and(|s| s.status == TaskStatus::Failed);
        if failed {
            plan.update_step(target, |s| {
                s.status = TaskStatus::Pending;
                s.error = None;
                s.estimated_duration *= RETRY_DURATION_FACTOR;
            });
            debug!(step = target, "Step reset for retry");
            touched.push(target.to_string());
        }
    }
    touched
}

fn apply_skip(action: &AdaptationAction, plan: &mut ExecutionPlan) -> Vec<String> {
    action
        .step_targets()
        .filter(|target| plan.skip_step(target))
        .map(str::to_string)
        .collect()
}

fn apply_replan(plan: &mut ExecutionPlan) -> Vec<String> {
    let touched = pending_ids(plan);
    plan.update_where(|s| s.status == TaskStatus::Pending, |s| {
        s.estimated_duration *= REPLAN_DURATION_FACTOR;
        s.priority = TaskPriority::High;
    });
    info!(steps = touched.len(), "Remaining steps re-prioritized");
    touched
}

fn apply_goal_adjustment(
    action: &AdaptationAction,
    plan: &mut ExecutionPlan,
    hierarchy: Option<&mut GoalHierarchy>,
) -> Vec<String> {
    let new_goal = action
        .modifications
        .iter()
        .filter(|m| m.kind == ModificationKind::GoalChange)
        .filter_map(|m| m.new_goal.clone())
        .last();
    if let Some(goal) = new_goal {
        info!(goal = %goal, "Goal adjusted");
        if let Some(h) = hierarchy {
            h.set_root_description(goal.clone());
        }
        plan.set_goal(goal);
    }
    Vec::new()
}

/// Replace a failed step with another approach.
///
/// A failed filesystem step becomes three stages: a diagnosis by the tool
/// doctor, a structure exploration (the original step, rewritten) and a
/// corrected execution that depends on the exploration. Other tools take an
/// explicitly supplied alternative tool and parameters, or are simply retried.
fn apply_alternative(action: &AdaptationAction, plan: &mut ExecutionPlan) -> Vec<String> {
    let mut touched = Vec::new();
    for modification in &action.modifications {
        let Some(step_id) = modification.target.clone() else {
            continue;
        };
        let Some(step) = plan.step(&step_id).cloned() else {
            continue;
        };
        if !modification.targets(&step_id) || step.status != TaskStatus::Failed {
            continue;
        }

        if step.tool_name.as_deref() == Some("filesystem") {
            // the rewritten step keeps its generated exploration params
            touched.extend(substitute_filesystem_step(plan, &step));
        } else {
            let tool = modification.alternative_tool.clone();
            let params = modification.alternative_params.clone();
            plan.update_step(&step_id, |s| {
                if let Some(tool) = tool {
                    s.tool_name = Some(tool);
                }
                if let Some(params) = params {
                    s.tool_params = params;
                }
            });
        }

        plan.update_step(&step_id, |s| {
            s.status = TaskStatus::Pending;
            s.error = None;
        });
        debug!(step = %step_id, "Alternative approach applied");
        touched.push(step_id);
    }
    touched
}

fn substitute_filesystem_step(plan: &mut ExecutionPlan, step: &PlanStep) -> Vec<String> {
    let doctor_id = format!("{}_doctor", step.step_id);
    let execute_id = format!("{}_execute", step.step_id);
    if plan.contains(&doctor_id) {
        return Vec::new();
    }

    let original_action = step.tool_action().unwrap_or("list").to_string();
    let original_path = step
        .tool_params
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_string);
    let error = step
        .error
        .clone()
        .unwrap_or_else(|| "parameter error".to_string());

    let mut doctor_params = Map::new();
    doctor_params.insert(
        "query".into(),
        json!(format!("filesystem {original_action} failed: {error}")),
    );
    doctor_params.insert("query_type".into(), json!("error_diagnosis"));
    doctor_params.insert("tool_name".into(), json!("filesystem"));
    doctor_params.insert("error_message".into(), json!(error));
    plan.push_step(
        PlanStep::new(&doctor_id, "diagnose the error with the tool doctor")
            .with_tool("mcp_doctor", doctor_params)
            .with_priority(step.priority),
    );

    let mut explore_params = Map::new();
    explore_params.insert("action".into(), json!("get_structure"));
    explore_params.insert(
        "path".into(),
        json!(original_path.clone().unwrap_or_else(|| "~/Desktop".into())),
    );
    explore_params.insert("depth".into(), json!(1));
    let doctor_dep = doctor_id.clone();
    plan.update_step(&step.step_id, |s| {
        s.tool_name = Some("system_explorer".into());
        s.tool_params = explore_params;
        s.description = format!("explore the target directory (originally: {original_action})");
        s.dependencies = vec![doctor_dep];
    });

    let corrected = action_correction("filesystem", &original_action)
        .map(str::to_string)
        .unwrap_or(original_action);
    let mut execute_params = Map::new();
    execute_params.insert("action".into(), json!(corrected));
    execute_params.insert(
        "path".into(),
        json!(original_path.unwrap_or_else(|| "탐색_결과_기반".into())),
    );
    plan.push_step(
        PlanStep::new(&execute_id, format!("run filesystem {corrected} with the diagnosis applied"))
            .with_tool("filesystem", execute_params)
            .with_dependencies([step.step_id.clone()])
            .with_priority(step.priority),
    );

    info!(step = %step.step_id, "Filesystem step split into diagnose, explore, execute");
    vec![doctor_id, execute_id]
}

fn strategy_prompt(
    event: &AdaptationEvent,
    plan: &ExecutionPlan,
    hierarchy: Option<&GoalHierarchy>,
    context: &AgentContext,
) -> String {
    let goals = hierarchy
        .map(|h| {
            h.execution_order()
                .iter()
                .filter_map(|id| h.goal(id))
                .map(|g| format!("- {} ({:?}, {:?})", g.description, g.goal_type, g.status))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| "(none)".into());
    format!(
        "A problem came up while executing a plan. Propose the best adaptation.\n\n\
         Goal: {goal}\n\n\
         Problem:\n\
         - trigger: {trigger:?}\n\
         - description: {description}\n\
         - severity: {severity}/5\n\
         - affected steps: {affected}\n\n\
         Plan status: {status}\n\
         Sub-goals:\n{goals}\n\
         Context: {limits}\n\n\
         Strategies: retry, alternative, skip, replan, adjust_goal, abort.\n\n\
         Reply with JSON only:\n\
         {{\"strategy\": \"retry|alternative|skip|replan|adjust_goal|abort\", \
         \"description\": \"...\", \
         \"modifications\": [{{\"type\": \"step_modification|goal_change|parameter_update\", \
         \"target\": \"step id\", \"action\": \"...\", \"details\": \"...\"}}], \
         \"expected_impact\": \"...\", \"confidence\": 0.8, \"estimated_time\": 45.0}}",
        goal = plan.goal,
        trigger = event.trigger,
        description = event.description,
        severity = event.severity,
        affected = event.affected_steps.join(", "),
        status = plan_status(plan),
        limits = context.limits_summary(),
    )
}
