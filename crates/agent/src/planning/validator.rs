//! Static plan validation and mechanical correction.
//!
//! Works on the raw plan object (`{"strategy": .., "steps": [..]}`) before
//! it becomes an [`ExecutionPlan`](super::plan::ExecutionPlan), so problems
//! in model output can be fixed without another LLM round trip.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Angle-bracket tokens standing in for something not yet found.
static ABSTRACT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"<[^>]*파일[^>]*경로[^>]*>",
        r"<[^>]*식별된[^>]*>",
        r"<[^>]*찾아진[^>]*>",
        r"<[^>]*결과[^>]*>",
        r"<[^>]*목록[^>]*>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static placeholder pattern"))
    .collect()
});

const FILE_KEYWORDS: &[&str] = &[
    "스크린샷",
    "screenshot",
    "이미지",
    "사진",
    "파일",
    "문서",
    "pdf",
    "삭제",
    "정리",
    "찾기",
    "검색",
    "file",
    "delete",
];

const EXPLORATION_TOOLS: &[&str] = &["system_explorer", "filesystem"];
const EXPLORATION_ACTIONS: &[&str] = &["tree", "list", "find", "search_files", "get_structure"];
const MUTATING_ACTIONS: &[&str] = &["delete", "move", "copy"];

/// Id of the synthetic exploration step the corrector inserts.
pub const EXPLORATION_STEP_ID: &str = "step_exploration";

fn valid_actions(tool: &str) -> Option<&'static [&'static str]> {
    match tool {
        "filesystem" => Some(&["list", "create_dir", "copy", "move", "delete"]),
        "system_explorer" => Some(&[
            "tree",
            "find",
            "locate",
            "explore_common",
            "get_structure",
            "search_files",
        ]),
        _ => None,
    }
}

pub(crate) fn action_correction(tool: &str, action: &str) -> Option<&'static str> {
    match (tool, action) {
        ("filesystem", "delete_file" | "remove") => Some("delete"),
        ("filesystem", "list_files" | "find") => Some("list"),
        ("system_explorer", "list") => Some("tree"),
        ("system_explorer", "search") => Some("search_files"),
        ("system_explorer", "find_files") => Some("find"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    AbstractPlaceholder,
    MissingExploration,
    InvalidToolParams,
    NonExecutableStep,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub step_id: String,
    pub description: String,
    pub suggested_fix: Option<String>,
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.step_id, self.description)
    }
}

/// Outcome of [`PlanValidator::validate`].
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// No critical issues.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

// ── Raw step helpers ──

fn raw_steps(plan: &Map<String, Value>) -> impl Iterator<Item = &Map<String, Value>> {
    plan.get("steps")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn step_id(step: &Map<String, Value>) -> String {
    step.get("step_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn tool_name(step: &Map<String, Value>) -> Option<&str> {
    step.get("tool_name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn action(step: &Map<String, Value>) -> Option<&str> {
    step.get("tool_params")?.get("action")?.as_str()
}

fn is_tool_call(step: &Map<String, Value>) -> bool {
    step.get("action_type").and_then(Value::as_str) == Some("tool_call")
}

fn is_exploration(step: &Map<String, Value>) -> bool {
    is_tool_call(step)
        && tool_name(step).is_some_and(|t| EXPLORATION_TOOLS.contains(&t))
        && action(step).is_some_and(|a| EXPLORATION_ACTIONS.contains(&a))
}

fn is_mutating_file_action(step: &Map<String, Value>) -> bool {
    is_tool_call(step)
        && tool_name(step) == Some("filesystem")
        && action(step).is_some_and(|a| MUTATING_ACTIONS.contains(&a))
}

/// Goal mentions files, screenshots, deletion and similar.
pub fn is_file_related_goal(goal: &str) -> bool {
    let goal = goal.to_lowercase();
    FILE_KEYWORDS.iter().any(|k| goal.contains(k))
}

/// Static checks over a raw plan object.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanValidator;

impl PlanValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, plan: &Map<String, Value>, goal: &str) -> ValidationReport {
        let mut issues = self.check_abstract_placeholders(plan);
        if is_file_related_goal(goal) {
            issues.extend(self.check_file_workflow(plan));
        }
        issues.extend(self.check_tool_actions(plan));
        issues.extend(self.check_executability(plan));
        ValidationReport { issues }
    }

    fn check_abstract_placeholders(&self, plan: &Map<String, Value>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for step in raw_steps(plan) {
            let Some(params) = step.get("tool_params") else {
                continue;
            };
            let text = params.to_string();
            for pattern in ABSTRACT_PATTERNS.iter() {
                let found: Vec<&str> = pattern.find_iter(&text).map(|m| m.as_str()).collect();
                if !found.is_empty() {
                    issues.push(ValidationIssue {
                        kind: IssueKind::AbstractPlaceholder,
                        step_id: step_id(step),
                        description: format!("abstract placeholder found: {}", found.join(", ")),
                        suggested_fix: Some(
                            "add an exploration step that finds the actual files first".into(),
                        ),
                        severity: Severity::Critical,
                    });
                }
            }
        }
        issues
    }

    fn check_file_workflow(&self, plan: &Map<String, Value>) -> Vec<ValidationIssue> {
        let has_exploration = raw_steps(plan).any(is_exploration);
        let has_mutation = raw_steps(plan).any(is_mutating_file_action);
        if has_mutation && !has_exploration {
            vec![ValidationIssue {
                kind: IssueKind::MissingExploration,
                step_id: "workflow".into(),
                description: "file operation has no exploration step before it".into(),
                suggested_fix: Some(
                    "explore the target with filesystem or system_explorer first".into(),
                ),
                severity: Severity::Critical,
            }]
        } else {
            Vec::new()
        }
    }

    fn check_tool_actions(&self, plan: &Map<String, Value>) -> Vec<ValidationIssue> {
        raw_steps(plan)
            .filter_map(|step| {
                let tool = tool_name(step)?;
                let valid = valid_actions(tool)?;
                let action = action(step)?;
                (!valid.contains(&action)).then(|| ValidationIssue {
                    kind: IssueKind::InvalidToolParams,
                    step_id: step_id(step),
                    description: format!("invalid action for {tool}: {action}"),
                    suggested_fix: Some(format!("valid actions: {}", valid.join(", "))),
                    severity: Severity::High,
                })
            })
            .collect()
    }

    fn check_executability(&self, plan: &Map<String, Value>) -> Vec<ValidationIssue> {
        raw_steps(plan)
            .filter(|step| is_tool_call(step) && tool_name(step).is_none())
            .map(|step| ValidationIssue {
                kind: IssueKind::NonExecutableStep,
                step_id: step_id(step),
                description: "tool_call step has no tool_name".into(),
                suggested_fix: Some("name a tool or change the action_type".into()),
                severity: Severity::High,
            })
            .collect()
    }
}

/// Mechanical fixes for what [`PlanValidator`] finds.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanCorrector {
    validator: PlanValidator,
}

impl PlanCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the corrected plan; a passing plan comes back unchanged.
    pub fn correct(&self, plan: &Map<String, Value>, goal: &str) -> Map<String, Value> {
        let report = self.validator.validate(plan, goal);
        if report.is_valid() && !report.has(IssueKind::InvalidToolParams) {
            info!("Plan validation passed");
            return plan.clone();
        }

        warn!(issues = report.issues.len(), "Plan validation found problems");
        for issue in &report.issues {
            warn!(step = %issue.step_id, "{}", issue.description);
        }

        let mut corrected = plan.clone();
        let bad_steps: HashSet<&str> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::InvalidToolParams)
            .map(|i| i.step_id.as_str())
            .collect();
        if !bad_steps.is_empty() {
            remap_actions(&mut corrected, &bad_steps);
        }
        // after remapping, so renamed mutating actions get re-wired too
        if report.has(IssueKind::AbstractPlaceholder) || report.has(IssueKind::MissingExploration) {
            insert_exploration_step(&mut corrected, goal);
        }
        info!("Plan correction finished");
        corrected
    }
}

fn target_directory(goal: &str) -> &'static str {
    let goal = goal.to_lowercase();
    if goal.contains("문서") || goal.contains("documents") {
        "~/Documents"
    } else if goal.contains("다운로드") || goal.contains("downloads") {
        "~/Downloads"
    } else {
        "~/Desktop"
    }
}

fn insert_exploration_step(plan: &mut Map<String, Value>, goal: &str) {
    if !matches!(plan.get("steps"), Some(Value::Array(_))) {
        plan.insert("steps".into(), Value::Array(Vec::new()));
    }
    let Some(Value::Array(steps)) = plan.get_mut("steps") else {
        return;
    };

    let exists = steps
        .iter()
        .any(|s| s.get("step_id").and_then(Value::as_str) == Some(EXPLORATION_STEP_ID));
    if exists {
        return;
    }

    let exploration = json!({
        "step_id": EXPLORATION_STEP_ID,
        "description": "explore the target directory and collect the file list",
        "action_type": "tool_call",
        "tool_name": "filesystem",
        "tool_params": {"action": "list", "path": target_directory(goal)},
        "dependencies": [],
        "priority": 4,
        "estimated_duration": 10.0,
        "success_criteria": "file list collected",
        "failure_recovery": "check the path and retry"
    });
    let position = if steps.is_empty() { 0 } else { 1 };
    steps.insert(position, exploration);

    for step in steps.iter_mut().skip(position + 1) {
        let Some(obj) = step.as_object_mut() else {
            continue;
        };
        if !is_mutating_file_action(obj) {
            continue;
        }
        let deps = obj
            .entry("dependencies")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !deps.is_array() {
            *deps = Value::Array(Vec::new());
        }
        if let Value::Array(list) = deps {
            if !list.iter().any(|d| d.as_str() == Some(EXPLORATION_STEP_ID)) {
                list.push(Value::String(EXPLORATION_STEP_ID.into()));
            }
        }
    }
    info!(position, "Inserted exploration step");
}

fn remap_actions(plan: &mut Map<String, Value>, bad_steps: &HashSet<&str>) {
    let Some(Value::Array(steps)) = plan.get_mut("steps") else {
        return;
    };
    for step in steps.iter_mut().filter_map(Value::as_object_mut) {
        if !bad_steps.contains(step_id(step).as_str()) {
            continue;
        }
        let Some(tool) = tool_name(step).map(str::to_string) else {
            continue;
        };
        let Some(Value::Object(params)) = step.get_mut("tool_params") else {
            continue;
        };
        let Some(old) = params.get("action").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        if let Some(new) = action_correction(&tool, &old) {
            params.insert("action".into(), Value::String(new.into()));
            info!(tool = %tool, from = %old, to = new, "Corrected tool action");
        }
    }
}
