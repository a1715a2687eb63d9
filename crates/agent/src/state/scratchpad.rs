//! Scratchpad: the ledger of one goal attempt.
//!
//! Records the goal, every Thought → Action → Observation step, the full
//! reasoning history, and the set of completed operation keys. The
//! scratchpad is:
//!
//! - **Attempt-scoped**: created when a goal attempt starts, finalized once
//!   when it ends, never shared between attempts
//! - **Append-only**: steps are only added; after a step is superseded only
//!   its action status may still change
//! - **Renderable**: [`Scratchpad::get_formatted_history`] is the input to
//!   every subsequent prompt
//! - **Serializable**: can be exported to JSON for inspection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use steward_config::HistoryPolicy;
use tracing::warn;

use super::operation_key::operation_key;

/// How many trailing steps count as "recent" for duplicate and failure checks.
const RECENT_WINDOW: usize = 3;

// ── Data Structures ───────────────────────────────────────────────────────

/// A single reasoning record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub content: String,
    /// Self-rated confidence in `0.0..=1.0`.
    pub confidence: f32,
    /// Reasoning depth in `1..=5`.
    pub reasoning_depth: u8,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// What an action does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    ToolCall {
        tool_name: String,
        parameters: Map<String, Value>,
    },
    Thought,
    Observation,
    FinalAnswer {
        answer: String,
    },
}

/// Execution state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// An action chosen for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub status: ActionStatus,
    /// Seconds spent executing, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn tool_name(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::ToolCall { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.kind, ActionKind::ToolCall { .. })
    }

    pub fn is_final_answer(&self) -> bool {
        matches!(self.kind, ActionKind::FinalAnswer { .. })
    }

    /// Operation key for tool calls.
    pub fn operation_key(&self) -> Option<String> {
        match &self.kind {
            ActionKind::ToolCall {
                tool_name,
                parameters,
            } => Some(operation_key(tool_name, parameters)),
            _ => None,
        }
    }
}

/// The outcome of executing an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub content: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// Only populated for failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lessons_learned: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// One Thought → Action → Observation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<Thought>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Step {
    fn new(number: usize) -> Self {
        Self {
            number,
            thought: None,
            action: None,
            observation: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// All three sub-records are present.
    pub fn is_complete(&self) -> bool {
        self.thought.is_some() && self.action.is_some() && self.observation.is_some()
    }

    /// A tool call whose observation succeeded.
    pub fn is_successful_tool_call(&self) -> bool {
        self.action.as_ref().is_some_and(Action::is_tool_call)
            && self.observation.as_ref().is_some_and(|o| o.success)
    }

    fn succeeded(&self) -> bool {
        self.observation.as_ref().is_some_and(|o| o.success)
    }

    fn failed(&self) -> bool {
        self.observation.as_ref().is_some_and(|o| !o.success)
    }
}

/// The ledger for one goal attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scratchpad {
    pub goal: String,
    pub steps: Vec<Step>,

    /// Every thought's content, verbatim and in order.
    pub reasoning_history: Vec<String>,

    /// Operation keys of tool calls that succeeded.
    pub completed_operations: BTreeSet<String>,

    pub total_tool_calls: usize,
    pub successful_tool_calls: usize,
    pub failed_tool_calls: usize,
    pub unique_tools: BTreeSet<String>,

    pub history_policy: HistoryPolicy,

    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

// ── Implementation ────────────────────────────────────────────────────────

impl Scratchpad {
    /// Create an empty scratchpad with unbounded reasoning history.
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            reasoning_history: Vec::new(),
            completed_operations: BTreeSet::new(),
            total_tool_calls: 0,
            successful_tool_calls: 0,
            failed_tool_calls: 0,
            unique_tools: BTreeSet::new(),
            history_policy: HistoryPolicy::Unbounded,
            started_at: Utc::now(),
            ended_at: None,
            final_result: None,
            success: None,
        }
    }

    /// Opt into a reasoning-history compaction policy.
    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    // ── Step recording ──

    /// Append a new step with the next sequence number.
    ///
    /// The previous step is not required to be complete.
    pub fn start_new_step(&mut self) -> &mut Step {
        let number = self.steps.len() + 1;
        self.steps.push(Step::new(number));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    fn current_step_mut(&mut self) -> &mut Step {
        if self.steps.is_empty() {
            return self.start_new_step();
        }
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    /// The most recent step, if any.
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Attach a thought to the current step and log it to the history.
    pub fn add_thought(
        &mut self,
        content: impl Into<String>,
        reasoning_depth: u8,
        confidence: f32,
        tags: Vec<String>,
    ) -> &Thought {
        let content = content.into();
        self.reasoning_history.push(content.clone());
        if let HistoryPolicy::KeepLast(n) = self.history_policy {
            if self.reasoning_history.len() > n {
                let excess = self.reasoning_history.len() - n;
                self.reasoning_history.drain(..excess);
            }
        }

        let step = self.current_step_mut();
        step.thought.insert(Thought {
            content,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning_depth: reasoning_depth.clamp(1, 5),
            tags,
            timestamp: Utc::now(),
        })
    }

    /// Attach an action to the current step.
    pub fn add_action(&mut self, kind: ActionKind) -> &Action {
        if let ActionKind::ToolCall { tool_name, .. } = &kind {
            self.total_tool_calls += 1;
            self.unique_tools.insert(tool_name.clone());
        }
        let step = self.current_step_mut();
        step.action.insert(Action {
            kind,
            status: ActionStatus::Pending,
            execution_time: None,
            error_message: None,
            timestamp: Utc::now(),
        })
    }

    /// Update the current step's action status.
    pub fn update_action_status(
        &mut self,
        status: ActionStatus,
        execution_time: Option<f64>,
        error_message: Option<String>,
    ) {
        if let Some(action) = self.steps.last_mut().and_then(|s| s.action.as_mut()) {
            action.status = status;
            if execution_time.is_some() {
                action.execution_time = execution_time;
            }
            if error_message.is_some() {
                action.error_message = error_message;
            }
        }
    }

    /// Attach an observation to the current step.
    ///
    /// Closes the step when thought, action, and observation are all present,
    /// and updates counters and the completed-operation set for tool calls.
    pub fn add_observation(
        &mut self,
        content: impl Into<String>,
        success: bool,
        data: Option<Value>,
        analysis: Option<String>,
        lessons_learned: Vec<String>,
    ) -> &Observation {
        let content = content.into();
        let lessons = if success { Vec::new() } else { lessons_learned };

        let mut completed_key = None;
        let mut tool_call = false;
        {
            let step = self.current_step_mut();
            if let Some(action) = step.action.as_mut() {
                if action.is_tool_call() {
                    tool_call = true;
                    if matches!(action.status, ActionStatus::Pending | ActionStatus::Executing) {
                        action.status = if success {
                            ActionStatus::Completed
                        } else {
                            ActionStatus::Failed
                        };
                    }
                    if !success && action.error_message.is_none() {
                        action.error_message = Some(content.clone());
                    }
                    if success {
                        completed_key = action.operation_key();
                    }
                }
            }
        }

        if tool_call {
            if success {
                self.successful_tool_calls += 1;
            } else {
                self.failed_tool_calls += 1;
            }
        }
        if let Some(key) = completed_key {
            self.completed_operations.insert(key);
        }

        let step = self.current_step_mut();
        if step.thought.is_some() && step.action.is_some() {
            step.ended_at = Some(Utc::now());
        }
        step.observation.insert(Observation {
            content,
            success,
            data,
            analysis,
            lessons_learned: lessons,
            timestamp: Utc::now(),
        })
    }

    /// Record the terminal outcome. Only the first call takes effect.
    pub fn finalize(&mut self, final_result: impl Into<String>, success: bool) {
        if self.ended_at.is_some() {
            warn!(goal = %self.goal, "Scratchpad already finalized, ignoring");
            return;
        }
        self.ended_at = Some(Utc::now());
        self.final_result = Some(final_result.into());
        self.success = Some(success);
    }

    pub fn is_finalized(&self) -> bool {
        self.ended_at.is_some()
    }

    // ── Duplicate detection ──

    /// Whether a tool call repeats work already done.
    ///
    /// Skips when the operation key is in the completed set, or when one of
    /// the last three steps ran the same tool with an equal key and
    /// succeeded. Returns `(false, "")` otherwise.
    pub fn should_skip_duplicate_operation(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
    ) -> (bool, String) {
        let key = operation_key(tool_name, params);
        if self.completed_operations.contains(&key) {
            return (true, format!("operation '{key}' was already completed"));
        }

        for step in self.steps.iter().rev().take(RECENT_WINDOW) {
            let Some(action) = &step.action else { continue };
            if action.tool_name() == Some(tool_name)
                && action.operation_key().as_deref() == Some(key.as_str())
                && step.succeeded()
            {
                return (
                    true,
                    format!(
                        "step {} already ran '{tool_name}' with equivalent parameters",
                        step.number
                    ),
                );
            }
        }

        (false, String::new())
    }

    /// The same operation key in each of the last three tool-call steps.
    pub fn detect_repetition(&self) -> Option<String> {
        if self.steps.len() < RECENT_WINDOW {
            return None;
        }
        let keys: Vec<Option<String>> = self
            .steps
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .map(|s| s.action.as_ref().and_then(Action::operation_key))
            .collect();
        match keys.first() {
            Some(Some(first)) if keys.iter().all(|k| k.as_ref() == Some(first)) => {
                Some(first.clone())
            }
            _ => None,
        }
    }

    // ── Goal heuristics ──

    /// Heuristic completion check.
    ///
    /// True when the last step is a successful final answer, or when the
    /// last three steps, scanned newest first, start with at least two
    /// consecutive successful tool calls.
    pub fn is_goal_achieved(&self) -> bool {
        let Some(last) = self.steps.last() else {
            return false;
        };
        if last.action.as_ref().is_some_and(Action::is_final_answer) && last.succeeded() {
            return true;
        }

        let consecutive = self
            .steps
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .take_while(|s| s.is_successful_tool_call())
            .count();
        consecutive >= 2
    }

    /// Failures among the last three steps.
    pub fn recent_failures(&self) -> usize {
        self.steps
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .filter(|s| s.failed())
            .count()
    }

    /// Nudge toward the natural next action for file-organising goals.
    pub fn suggested_next_step(&self) -> Option<String> {
        let mut created_dir = false;
        let mut found_files = false;
        for step in self.steps.iter().filter(|s| s.is_successful_tool_call()) {
            let Some(ActionKind::ToolCall {
                tool_name,
                parameters,
            }) = step.action.as_ref().map(|a| &a.kind)
            else {
                continue;
            };
            let action = parameters.get("action").and_then(Value::as_str).unwrap_or("");
            match (tool_name.as_str(), action) {
                ("filesystem", "create_dir" | "mkdir") => created_dir = true,
                ("smart_file_finder", _) => found_files = true,
                ("system_explorer", "find" | "locate" | "search_files") => found_files = true,
                _ => {}
            }
        }

        match (created_dir, found_files) {
            (true, true) => Some(
                "The target directory exists and the files were found: move the found files \
                 into it (filesystem, action=move)."
                    .into(),
            ),
            (true, false) => Some(
                "A directory was created: locate the files that belong in it \
                 (system_explorer, action=find)."
                    .into(),
            ),
            (false, true) => Some(
                "Files were found: create the destination directory if one is needed \
                 (filesystem, action=create_dir), then act on the found files."
                    .into(),
            ),
            (false, false) => None,
        }
    }

    // ── Rendering ──

    /// Full transcript for the next prompt.
    ///
    /// Contains the goal, every prior thought, the step log, a tool-usage
    /// summary deduplicated by operation key (latest success wins, every
    /// failure kept), warnings, and a suggested next step.
    pub fn get_formatted_history(&self, include_metadata: bool) -> String {
        let mut out = format!("Goal: {}\n", self.goal);

        if self.steps.is_empty() && self.reasoning_history.is_empty() {
            out.push_str("\nNo steps taken yet.\n");
            return out;
        }

        out.push_str("\n## Reasoning so far\n");
        if self.reasoning_history.is_empty() {
            out.push_str("(none)\n");
        }
        for (i, thought) in self.reasoning_history.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, thought);
        }

        out.push_str("\n## Steps\n");
        for step in &self.steps {
            self.render_step(&mut out, step, include_metadata);
        }

        let (successes, failures) = self.tool_usage_summary();
        if !successes.is_empty() || !failures.is_empty() {
            out.push_str("\n## Tool usage summary\n");
            for entry in &successes {
                let _ = writeln!(
                    out,
                    "- [done] {} (step {}): {}",
                    entry.key,
                    entry.step,
                    preview(&entry.content, 200)
                );
            }
            for entry in &failures {
                let _ = writeln!(
                    out,
                    "- [failed] {} (step {}): {}",
                    entry.key,
                    entry.step,
                    preview(&entry.content, 200)
                );
            }
        }

        let warnings = self.warnings();
        if !warnings.is_empty() {
            out.push_str("\n## Warnings\n");
            for w in &warnings {
                let _ = writeln!(out, "- {w}");
            }
        }

        if let Some(next) = self.suggested_next_step() {
            let _ = write!(out, "\n## Suggested next step\n{next}\n");
        }

        if include_metadata {
            let tools: Vec<&str> = self.unique_tools.iter().map(String::as_str).collect();
            let _ = write!(
                out,
                "\n## Statistics\n- steps: {}\n- tool calls: {} (succeeded: {}, failed: {})\n- tools used: {}\n",
                self.steps.len(),
                self.total_tool_calls,
                self.successful_tool_calls,
                self.failed_tool_calls,
                if tools.is_empty() { "none".to_string() } else { tools.join(", ") },
            );
        }

        out
    }

    fn render_step(&self, out: &mut String, step: &Step, include_metadata: bool) {
        let _ = writeln!(out, "--- Step {} ---", step.number);
        if let Some(t) = &step.thought {
            let _ = writeln!(out, "Thought: {}", t.content);
            if include_metadata {
                let _ = writeln!(
                    out,
                    "   (confidence: {:.2}, depth: {})",
                    t.confidence, t.reasoning_depth
                );
            }
        }
        if let Some(a) = &step.action {
            match &a.kind {
                ActionKind::ToolCall {
                    tool_name,
                    parameters,
                } => {
                    let _ = writeln!(
                        out,
                        "Action: {tool_name} {}",
                        Value::Object(parameters.clone())
                    );
                }
                ActionKind::FinalAnswer { .. } => out.push_str("Action: final answer\n"),
                ActionKind::Thought => out.push_str("Action: think\n"),
                ActionKind::Observation => out.push_str("Action: observe\n"),
            }
        }
        if let Some(o) = &step.observation {
            let status = if o.success { "ok" } else { "failed" };
            let _ = writeln!(out, "Observation [{status}]: {}", o.content);
            if let Some(analysis) = &o.analysis {
                let _ = writeln!(out, "   Analysis: {analysis}");
            }
            if !o.lessons_learned.is_empty() {
                out.push_str("   Lessons:\n");
                for lesson in &o.lessons_learned {
                    let _ = writeln!(out, "   - {lesson}");
                }
            }
        }
    }

    /// Successful operations (latest per key, first-seen order) and all failures.
    fn tool_usage_summary(&self) -> (Vec<UsageEntry>, Vec<UsageEntry>) {
        let mut successes: Vec<UsageEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut failures = Vec::new();

        for step in &self.steps {
            let (Some(action), Some(obs)) = (&step.action, &step.observation) else {
                continue;
            };
            let Some(key) = action.operation_key() else {
                continue;
            };
            let entry = UsageEntry {
                key: key.clone(),
                step: step.number,
                content: obs.content.clone(),
            };
            if obs.success {
                match index.get(&key) {
                    Some(&i) => successes[i] = entry,
                    None => {
                        index.insert(key, successes.len());
                        successes.push(entry);
                    }
                }
            } else {
                failures.push(entry);
            }
        }
        (successes, failures)
    }

    fn warnings(&self) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for key in self
            .steps
            .iter()
            .filter_map(|s| s.action.as_ref().and_then(Action::operation_key))
        {
            *counts.entry(key).or_default() += 1;
        }
        let mut repeated: Vec<(String, usize)> =
            counts.into_iter().filter(|(_, n)| *n >= 2).collect();
        repeated.sort();

        let mut warnings: Vec<String> = repeated
            .into_iter()
            .map(|(key, n)| {
                let done = if self.completed_operations.contains(&key) {
                    " and already succeeded"
                } else {
                    ""
                };
                format!("Repeated task: '{key}' was attempted {n} times{done}. Do not repeat it.")
            })
            .collect();

        let recent = self.recent_failures();
        if recent >= 2 {
            warnings.push(format!(
                "{recent} of the last {RECENT_WINDOW} steps failed. Change the approach \
                 (different tool, action, or parameters)."
            ));
        }
        warnings
    }

    /// Goal plus the last `steps_back` steps only.
    pub fn get_latest_context(&self, steps_back: usize) -> String {
        let mut out = format!("Goal: {}\n", self.goal);
        if self.steps.is_empty() {
            out.push_str("\nIn progress...\n");
            return out;
        }

        let omitted = self.steps.len().saturating_sub(steps_back);
        if omitted > 0 {
            let _ = writeln!(out, "({omitted} steps omitted)");
        }
        for step in &self.steps[omitted..] {
            let _ = writeln!(out, "Step {}:", step.number);
            if let Some(t) = &step.thought {
                let _ = writeln!(out, "  Thought: {}", t.content);
            }
            if let Some(a) = &step.action {
                match &a.kind {
                    ActionKind::ToolCall { tool_name, .. } => {
                        let _ = writeln!(out, "  Action: {tool_name}");
                    }
                    ActionKind::FinalAnswer { .. } => out.push_str("  Action: final answer\n"),
                    _ => {}
                }
            }
            if let Some(o) = &step.observation {
                let status = if o.success { "ok" } else { "failed" };
                let _ = writeln!(out, "  Result ({status}): {}", preview(&o.content, 300));
            }
        }
        out
    }

    // ── Summaries ──

    /// Observations of successful tool calls, oldest first.
    pub fn successful_observations(&self) -> impl Iterator<Item = (&Action, &Observation)> {
        self.steps.iter().filter_map(|s| match (&s.action, &s.observation) {
            (Some(a), Some(o)) if a.is_tool_call() && o.success => Some((a, o)),
            _ => None,
        })
    }

    /// Steps whose observation succeeded, out of all steps.
    pub fn success_ratio(&self) -> (usize, usize) {
        let ok = self.steps.iter().filter(|s| s.succeeded()).count();
        (ok, self.steps.len())
    }
}

struct UsageEntry {
    key: String,
    step: usize,
    content: String,
}

/// Shorten `text` to at most `max` characters.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}

// ── Tests ─────────────────────────────────────────────────────────────────
