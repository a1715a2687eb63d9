//! ReAct engine: Thought → Action → Observation, with or without a plan.
//!
//! Two drive modes share one scratchpad and the same tool-call path:
//!
//! - [`ReactEngine::execute_goal`] asks the model for a thought and an
//!   action on every iteration until it gives a final answer, the
//!   goal-achieved heuristic fires, or a budget runs out.
//! - [`ReactEngine::execute_goal_with_planning`] decomposes the goal, builds
//!   an [`ExecutionPlan`] up front and runs one runnable step per iteration,
//!   letting the [`DynamicAdapter`] rewrite the plan when a step goes wrong.
//!
//! Neither mode returns an error. Every ending (success, timeout, budget
//! exhaustion, halt) is an [`AgentResult`] with a non-empty final answer.

use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use steward_config::{AdapterConfig, AppConfig, HistoryPolicy, PlanningConfig};
use steward_core::event::{DomainEvent, EventBus};
use steward_core::provider::Provider;
use steward_core::tool::{ToolExecutor, ToolResult};
use tracing::{debug, info, warn};

use super::decision::ActionDecider;
use super::observation::{
    partial_summary, record_rejection, record_tool_result, success_answer, timeout_summary,
};
use super::outcome::{AgentContext, AgentResult, ErrorCode};
use super::params::validate_tool_params;
use super::thought::ThoughtGenerator;
use crate::canvas::{CanvasStore, TaskCanvas};
use crate::planning::{
    DependencyResults, DynamicAdapter, ExecutionPlan, GoalHierarchy, GoalManager,
    PlaceholderResolver, PlanStep, PlanningEngine, StepActionType, StepExecution, TaskStatus,
};
use crate::state::{ActionKind, ActionStatus, Scratchpad};

/// Failures of one plan step before it is skipped regardless of the adapter.
pub const DEFAULT_MAX_STEP_FAILURES: u32 = 3;

/// Error fragments that mean a step ran out of some external resource.
const EXHAUSTION_MARKERS: &[&str] = &["quota", "rate limit", "out of memory", "no space left"];

/// Drives goal attempts against a provider and a tool executor.
///
/// The engine holds no per-attempt state and can be shared behind an `Arc`;
/// each call to an `execute_*` method owns its own scratchpad and plan.
pub struct ReactEngine {
    tools: Arc<dyn ToolExecutor>,
    thoughts: ThoughtGenerator,
    decider: ActionDecider,
    planner: PlanningEngine,
    goals: GoalManager,
    adapter: DynamicAdapter,
    resolver: PlaceholderResolver,
    history_policy: HistoryPolicy,
    max_step_failures: u32,
    event_bus: Option<Arc<EventBus>>,
    canvas: Option<CanvasStore>,
}

/// How an attempt ended, before the shared bookkeeping in `finish`.
struct Ending {
    success: bool,
    answer: String,
    error_code: Option<ErrorCode>,
    metadata: Map<String, Value>,
}

impl Ending {
    fn success(answer: String) -> Self {
        Self {
            success: true,
            answer,
            error_code: None,
            metadata: Map::new(),
        }
    }

    fn failure(answer: String, error_code: Option<ErrorCode>) -> Self {
        Self {
            success: false,
            answer,
            error_code,
            metadata: Map::new(),
        }
    }

    fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl ReactEngine {
    /// Create an engine with default settings for every component.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            tools,
            thoughts: ThoughtGenerator::new(provider.clone(), &model),
            decider: ActionDecider::new(provider.clone(), &model),
            planner: PlanningEngine::new(provider.clone(), &model),
            goals: GoalManager::new(provider.clone(), &model),
            adapter: DynamicAdapter::new(provider, &model),
            resolver: PlaceholderResolver::default(),
            history_policy: HistoryPolicy::default(),
            max_step_failures: DEFAULT_MAX_STEP_FAILURES,
            event_bus: None,
            canvas: None,
        }
    }

    /// Create an engine from the loaded configuration.
    ///
    /// The canvas store is attached only when `[canvas] enabled = true`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        config: &AppConfig,
    ) -> Self {
        let engine = &config.engine;
        let mut this = Self::new(provider, tools, &engine.model)
            .with_temperature(engine.temperature)
            .with_max_tokens(engine.max_tokens)
            .with_forced_tool_retry(engine.forced_tool_retry)
            .with_max_step_failures(engine.max_step_failures)
            .with_history_policy(engine.history_policy)
            .with_planning_config(&config.planning)
            .with_adapter_config(config.adapter.clone());
        if let Some(store) = CanvasStore::from_config(&config.canvas) {
            this = this.with_canvas(store);
        }
        this
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Track planning-mode attempts in `store` and skip goals it has
    /// already seen completed.
    pub fn with_canvas(mut self, store: CanvasStore) -> Self {
        self.canvas = Some(store);
        self
    }

    pub fn with_resolver(mut self, resolver: PlaceholderResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_max_step_failures(mut self, max: u32) -> Self {
        self.max_step_failures = max.max(1);
        self
    }

    pub fn with_forced_tool_retry(mut self, enabled: bool) -> Self {
        self.decider = self.decider.with_forced_tool_retry(enabled);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.thoughts = self.thoughts.with_temperature(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.thoughts = self.thoughts.with_max_tokens(max);
        self.decider = self.decider.with_max_tokens(max);
        self.planner = self.planner.with_max_tokens(max);
        self
    }

    pub fn with_planning_config(mut self, config: &PlanningConfig) -> Self {
        self.planner = self.planner.with_config(config);
        self
    }

    pub fn with_adapter_config(mut self, config: AdapterConfig) -> Self {
        self.adapter = self.adapter.with_config(config);
        self
    }

    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    /// The adapter, for inspecting its event and action history.
    pub fn adapter(&self) -> &DynamicAdapter {
        &self.adapter
    }

    // ── Plain loop ──

    /// Run the thought/action/observation loop until the goal is reached
    /// or a budget runs out.
    pub async fn execute_goal(&self, context: &AgentContext) -> AgentResult {
        let started = Instant::now();
        info!(
            goal = %context.goal,
            max_iter = context.max_iterations,
            timeout_secs = context.timeout_seconds,
            "ReAct loop starting"
        );
        self.publish(DomainEvent::GoalStarted {
            goal: context.goal.clone(),
            planning: false,
            timestamp: Utc::now(),
        });

        let mut scratchpad =
            Scratchpad::new(&context.goal).with_history_policy(self.history_policy);
        let tools = self.tools.catalog();
        let mut iterations = 0;

        while iterations < context.max_iterations {
            if timed_out(started, context) {
                let answer = timeout_summary(&scratchpad, context.timeout_seconds);
                return self.finish(
                    scratchpad,
                    Ending::failure(answer, Some(ErrorCode::TimeoutExceeded)),
                    iterations,
                    started,
                );
            }
            iterations += 1;
            debug!(iteration = iterations, "ReAct iteration");

            let thought = self.thoughts.generate_thought(&mut scratchpad, context).await;
            let action = self
                .decider
                .decide(&thought, &scratchpad, context, &tools)
                .await;

            match action {
                ActionKind::FinalAnswer { answer } => {
                    let answer = if answer.trim().is_empty() {
                        success_answer(&scratchpad)
                    } else {
                        answer
                    };
                    scratchpad.add_action(ActionKind::FinalAnswer {
                        answer: answer.clone(),
                    });
                    scratchpad.add_observation(
                        answer.clone(),
                        true,
                        None,
                        Some("final answer given".into()),
                        Vec::new(),
                    );
                    return self.finish(scratchpad, Ending::success(answer), iterations, started);
                }
                ActionKind::ToolCall {
                    tool_name,
                    parameters,
                } => {
                    self.run_tool_call(&mut scratchpad, &tool_name, &parameters)
                        .await;

                    if scratchpad.is_goal_achieved() {
                        info!(iteration = iterations, "Goal achieved");
                        let answer = success_answer(&scratchpad);
                        return self.finish(
                            scratchpad,
                            Ending::success(answer),
                            iterations,
                            started,
                        );
                    }
                    if let Some(key) = scratchpad.detect_repetition() {
                        warn!(operation = %key, "Same operation repeated three times, stopping");
                        let answer = partial_summary(&scratchpad);
                        return self.finish(
                            scratchpad,
                            Ending::failure(answer, None)
                                .with_meta("stopped_reason", "repetition")
                                .with_meta("repeated_operation", key),
                            iterations,
                            started,
                        );
                    }
                }
                other => {
                    debug!(action = ?other, "Non-executable action recorded");
                    scratchpad.add_action(other);
                }
            }
        }

        warn!(max_iter = context.max_iterations, "ReAct loop hit max iterations");
        let answer = partial_summary(&scratchpad);
        self.finish(
            scratchpad,
            Ending::failure(answer, Some(ErrorCode::MaxIterationsReached)),
            iterations,
            started,
        )
    }

    /// Validate, record and execute one model-chosen tool call.
    async fn run_tool_call(
        &self,
        scratchpad: &mut Scratchpad,
        tool_name: &str,
        parameters: &Map<String, Value>,
    ) -> ToolResult {
        let metadata = self.tools.get_tool_metadata(tool_name);
        match validate_tool_params(tool_name, parameters, metadata.as_ref()) {
            Ok(params) => {
                scratchpad.add_action(ActionKind::ToolCall {
                    tool_name: tool_name.to_string(),
                    parameters: params.clone(),
                });
                self.invoke(scratchpad, tool_name, params).await
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(tool = %tool_name, error = %reason, "Tool call rejected before execution");
                scratchpad.add_action(ActionKind::ToolCall {
                    tool_name: tool_name.to_string(),
                    parameters: parameters.clone(),
                });
                scratchpad.update_action_status(ActionStatus::Failed, None, Some(reason.clone()));
                record_rejection(scratchpad, &reason);
                ToolResult::failure(reason)
            }
        }
    }

    /// Execute the current step's tool call and record its observation.
    async fn invoke(
        &self,
        scratchpad: &mut Scratchpad,
        tool_name: &str,
        params: Map<String, Value>,
    ) -> ToolResult {
        scratchpad.update_action_status(ActionStatus::Executing, None, None);
        let call_started = Instant::now();
        let result = self.tools.execute(tool_name, Value::Object(params)).await;
        let elapsed = call_started.elapsed();

        let status = if result.success {
            ActionStatus::Completed
        } else {
            ActionStatus::Failed
        };
        scratchpad.update_action_status(
            status,
            Some(elapsed.as_secs_f64()),
            result.error_message.clone(),
        );
        record_tool_result(scratchpad, &result);

        if result.success {
            info!(tool = %tool_name, duration_ms = elapsed.as_millis() as u64, "Tool executed");
        } else {
            warn!(
                tool = %tool_name,
                error = result.error_message.as_deref().unwrap_or("unknown error"),
                "Tool failed"
            );
        }
        self.publish(DomainEvent::ToolExecuted {
            tool_name: tool_name.to_string(),
            success: result.success,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }

    // ── Plan-driven loop ──

    /// Decompose the goal, plan it, and execute the plan one step at a time.
    pub async fn execute_goal_with_planning(&self, context: &AgentContext) -> AgentResult {
        let started = Instant::now();
        info!(
            goal = %context.goal,
            max_iter = context.max_iterations,
            timeout_secs = context.timeout_seconds,
            "Plan-driven execution starting"
        );
        self.publish(DomainEvent::GoalStarted {
            goal: context.goal.clone(),
            planning: true,
            timestamp: Utc::now(),
        });

        let mut scratchpad =
            Scratchpad::new(&context.goal).with_history_policy(self.history_policy);

        if let Some(done) = self.completed_canvas(&context.goal) {
            info!(canvas_id = %done.canvas_id, "Goal already completed, nothing to execute");
            let answer = format!(
                "This task was already completed: {}\n{}",
                done.goal,
                done.generate_progress_summary()
            );
            return self.finish(
                scratchpad,
                Ending::success(answer)
                    .with_meta("already_completed", true)
                    .with_meta("canvas_id", done.canvas_id),
                0,
                started,
            );
        }

        let tools = self.tools.catalog();
        let mut hierarchy = self.goals.decompose_goal(&context.goal, context, &tools).await;
        let mut plan = self
            .planner
            .create_execution_plan(&context.goal, context, &tools)
            .await;
        if plan.is_empty() {
            warn!("Plan has no steps, falling back to the plain loop");
            return self.execute_goal(context).await;
        }
        let mut canvas = self.open_canvas(&context.goal, &plan);

        let mut failures: HashMap<String, u32> = HashMap::new();
        let mut iterations = 0;
        let mut halted = false;

        while iterations < context.max_iterations {
            if timed_out(started, context) {
                let answer = timeout_summary(&scratchpad, context.timeout_seconds);
                return self.finish(
                    scratchpad,
                    Ending::failure(answer, Some(ErrorCode::TimeoutExceeded))
                        .with_meta("plan_id", plan.plan_id.clone()),
                    iterations,
                    started,
                );
            }

            let next = plan.get_next_steps().first().map(|s| (*s).clone());
            let Some(step) = next else {
                if plan.is_completed() {
                    info!(plan_id = %plan.plan_id, "Plan completed");
                    let answer = success_answer(&scratchpad);
                    return self.finish(
                        scratchpad,
                        Ending::success(answer).with_meta("plan_id", plan.plan_id.clone()),
                        iterations,
                        started,
                    );
                }
                warn!(
                    plan_id = %plan.plan_id,
                    failed = plan.count(TaskStatus::Failed),
                    pending = plan.count(TaskStatus::Pending),
                    "No runnable steps left, halting"
                );
                halted = true;
                break;
            };
            iterations += 1;
            debug!(iteration = iterations, step = %step.step_id, "Executing plan step");

            plan.mark_in_progress(&step.step_id);
            self.mirror(&mut canvas, &plan);

            let step_started = Instant::now();
            let outcome = self.run_plan_step(&mut scratchpad, &mut plan, &step).await;
            let execution = StepExecution {
                success: outcome.is_ok(),
                resource_exhausted: outcome.as_ref().err().is_some_and(|e| is_exhaustion(e)),
                error: outcome.err(),
                execution_time: step_started.elapsed().as_secs_f64(),
                total_elapsed: started.elapsed().as_secs_f64(),
            };

            let mut capped = false;
            if !execution.success {
                let count = failures.entry(step.step_id.clone()).or_default();
                *count += 1;
                if *count >= self.max_step_failures {
                    warn!(step = %step.step_id, failures = *count, "Step failure cap reached, skipping");
                    plan.skip_step(&step.step_id);
                    self.publish(DomainEvent::PlanAdapted {
                        plan_id: plan.plan_id.clone(),
                        strategy: "skip".into(),
                        affected_steps: vec![step.step_id.clone()],
                        timestamp: Utc::now(),
                    });
                    capped = true;
                }
            }

            if !capped {
                if let Some(event) =
                    self.adapter
                        .analyze_situation(&plan, &step, &execution, context)
                {
                    let action = self
                        .adapter
                        .generate_adaptation_strategy(&event, &plan, Some(&hierarchy), context)
                        .await;
                    let touched =
                        self.adapter
                            .apply_adaptation(&action, &mut plan, Some(&mut hierarchy));
                    self.publish(DomainEvent::PlanAdapted {
                        plan_id: plan.plan_id.clone(),
                        strategy: action.strategy.as_str().to_string(),
                        affected_steps: touched,
                        timestamp: Utc::now(),
                    });
                }
            }

            self.reorder(&mut hierarchy, &plan, context, started);
            self.mirror(&mut canvas, &plan);
        }

        let answer = partial_summary(&scratchpad);
        let ending = if halted {
            Ending::failure(answer, None).with_meta("stopped_reason", "plan_halted")
        } else {
            warn!(max_iter = context.max_iterations, "Plan loop hit max iterations");
            Ending::failure(answer, Some(ErrorCode::MaxIterationsReached))
        };
        self.finish(
            scratchpad,
            ending.with_meta("plan_id", plan.plan_id.clone()),
            iterations,
            started,
        )
    }

    /// Run one plan step and record its outcome in the plan.
    ///
    /// Non-tool steps complete with their description. Tool steps go through
    /// placeholder resolution, parameter validation and the duplicate check
    /// before reaching the executor.
    async fn run_plan_step(
        &self,
        scratchpad: &mut Scratchpad,
        plan: &mut ExecutionPlan,
        step: &PlanStep,
    ) -> Result<(), String> {
        let tool_name = match (step.action_type, step.tool_name.as_deref()) {
            (StepActionType::ToolCall, Some(tool)) => tool.to_string(),
            (StepActionType::ToolCall, None) => {
                let reason = format!("step '{}' is a tool call without a tool", step.step_id);
                plan.fail_step(&step.step_id, reason.clone());
                return Err(reason);
            }
            _ => {
                plan.complete_step(&step.step_id, Value::String(step.description.clone()));
                return Ok(());
            }
        };

        let deps: DependencyResults = step
            .dependencies
            .iter()
            .filter_map(|dep| {
                let result = plan.step(dep)?.result.clone()?;
                Some((dep.clone(), result))
            })
            .collect();
        let resolved = self.resolver.resolve(&step.tool_params, &deps);

        let metadata = self.tools.get_tool_metadata(&tool_name);
        let params = match validate_tool_params(&tool_name, &resolved, metadata.as_ref()) {
            Ok(params) => params,
            Err(e) => {
                let reason = e.to_string();
                warn!(step = %step.step_id, error = %reason, "Plan step rejected before execution");
                begin_step(scratchpad, step, &tool_name, resolved);
                scratchpad.update_action_status(ActionStatus::Failed, None, Some(reason.clone()));
                record_rejection(scratchpad, &reason);
                plan.fail_step(&step.step_id, reason.clone());
                return Err(reason);
            }
        };

        let (duplicate, reason) = scratchpad.should_skip_duplicate_operation(&tool_name, &params);
        if duplicate {
            info!(step = %step.step_id, reason = %reason, "Skipping duplicate operation");
            plan.complete_step(&step.step_id, json!({"skipped": true, "reason": reason}));
            return Ok(());
        }

        begin_step(scratchpad, step, &tool_name, params.clone());
        let result = self.invoke(scratchpad, &tool_name, params).await;
        if result.success {
            let value = result
                .data
                .clone()
                .unwrap_or_else(|| Value::String(result.output.clone()));
            plan.complete_step(&step.step_id, value);
            Ok(())
        } else {
            let reason = result
                .error_message
                .clone()
                .unwrap_or_else(|| result.output.clone());
            plan.fail_step(&step.step_id, reason.clone());
            Err(reason)
        }
    }

    /// Feed plan progress back into the goal hierarchy.
    ///
    /// Goals and steps share ids only when the model reuses them; unknown ids
    /// are ignored by the hierarchy.
    fn reorder(
        &self,
        hierarchy: &mut GoalHierarchy,
        plan: &ExecutionPlan,
        context: &AgentContext,
        started: Instant,
    ) {
        let ids_with = |status: TaskStatus| -> Vec<String> {
            plan.steps()
                .iter()
                .filter(|s| s.status == status)
                .map(|s| s.step_id.clone())
                .collect()
        };
        let remaining = context.timeout_seconds as f64 - started.elapsed().as_secs_f64();
        self.goals.reorder_goals(
            hierarchy,
            remaining,
            &ids_with(TaskStatus::Completed),
            &ids_with(TaskStatus::Failed),
        );
    }

    // ── Canvas ──

    /// A completed canvas for a goal like this one, if tracking is on.
    fn completed_canvas(&self, goal: &str) -> Option<TaskCanvas> {
        let store = self.canvas.as_ref()?;
        match store.find_existing(goal) {
            Ok(found) => found.filter(TaskCanvas::is_completed),
            Err(e) => {
                self.canvas_error("canvas lookup", &e.to_string());
                None
            }
        }
    }

    fn open_canvas(&self, goal: &str, plan: &ExecutionPlan) -> Option<TaskCanvas> {
        let store = self.canvas.as_ref()?;
        match store.create_canvas(goal, plan) {
            Ok(canvas) => {
                debug!(canvas_id = %canvas.canvas_id, "Canvas created");
                Some(canvas)
            }
            Err(e) => {
                self.canvas_error("canvas creation", &e.to_string());
                None
            }
        }
    }

    /// Mirror plan statuses into the canvas and persist any change.
    fn mirror(&self, canvas: &mut Option<TaskCanvas>, plan: &ExecutionPlan) {
        let (Some(store), Some(canvas)) = (self.canvas.as_ref(), canvas.as_mut()) else {
            return;
        };
        if canvas.sync_from_plan(plan) {
            if let Err(e) = store.save(canvas) {
                self.canvas_error("canvas save", &e.to_string());
            }
        }
    }

    fn canvas_error(&self, context: &str, message: &str) {
        warn!(error = %message, "{context} failed, continuing without it");
        self.publish(DomainEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    // ── Shared ──

    fn finish(
        &self,
        mut scratchpad: Scratchpad,
        ending: Ending,
        iterations: usize,
        started: Instant,
    ) -> AgentResult {
        let Ending {
            success,
            answer,
            error_code,
            mut metadata,
        } = ending;
        let elapsed = started.elapsed().as_secs_f64();
        scratchpad.finalize(answer.clone(), success);
        metadata.insert("iterations".into(), json!(iterations));
        metadata.insert("execution_time".into(), json!(elapsed));

        info!(
            success,
            iterations,
            elapsed_secs = elapsed,
            error_code = error_code.as_ref().map(ErrorCode::as_str).unwrap_or("none"),
            "Goal attempt finished"
        );
        self.publish(DomainEvent::GoalFinished {
            goal: scratchpad.goal.clone(),
            success,
            iterations,
            error_code: error_code.as_ref().map(|c| c.as_str().to_string()),
            timestamp: Utc::now(),
        });

        AgentResult {
            success,
            final_answer: answer,
            scratchpad,
            error_code,
            metadata,
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

fn timed_out(started: Instant, context: &AgentContext) -> bool {
    started.elapsed() >= Duration::from_secs(context.timeout_seconds)
}

fn is_exhaustion(error: &str) -> bool {
    let lower = error.to_lowercase();
    EXHAUSTION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Open a scratchpad step for a plan step's tool call.
fn begin_step(
    scratchpad: &mut Scratchpad,
    step: &PlanStep,
    tool_name: &str,
    params: Map<String, Value>,
) {
    scratchpad.start_new_step();
    scratchpad.add_thought(
        format!("Plan step {}: {}", step.step_id, step.description),
        1,
        0.8,
        vec!["plan".into()],
    );
    scratchpad.add_action(ActionKind::ToolCall {
        tool_name: tool_name.to_string(),
        parameters: params,
    });
}
