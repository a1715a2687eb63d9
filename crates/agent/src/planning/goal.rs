//! Goal decomposition and prioritization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest};
use steward_core::tool::ToolMetadata;
use tracing::{debug, info, warn};

use super::engine::describe_tools;
use super::plan::{TaskPriority, TaskStatus};
use crate::lenient;
use crate::patterns::outcome::AgentContext;

/// Remaining seconds under which pending primary/secondary goals escalate.
pub const CRITICAL_REMAINING_SECS: f64 = 60.0;

const PRIORITY_WEIGHT: f64 = 0.6;
const URGENCY_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Primary,
    Secondary,
    Prerequisite,
    Optional,
}

impl GoalType {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "secondary" => Self::Secondary,
            "prerequisite" => Self::Prerequisite,
            "optional" => Self::Optional,
            _ => Self::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalUrgency {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl GoalUrgency {
    fn from_value(value: &Value) -> Option<Self> {
        TaskPriority::from_value(value).map(|p| match p {
            TaskPriority::Low => Self::Low,
            TaskPriority::Medium => Self::Medium,
            TaskPriority::High => Self::High,
            TaskPriority::Critical => Self::Critical,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: String,
    pub description: String,
    pub goal_type: GoalType,
    pub priority: TaskPriority,
    pub urgency: GoalUrgency,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub sub_goals: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(goal_id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            goal_id: goal_id.into(),
            description: description.into(),
            goal_type: GoalType::Primary,
            priority: TaskPriority::Medium,
            urgency: GoalUrgency::Medium,
            dependencies: Vec::new(),
            sub_goals: Vec::new(),
            success_criteria: Vec::new(),
            constraints: Map::new(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_type(mut self, goal_type: GoalType) -> Self {
        self.goal_type = goal_type;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_urgency(mut self, urgency: GoalUrgency) -> Self {
        self.urgency = urgency;
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

    /// `priority * 0.6 + urgency * 0.4`.
    pub fn combined_score(&self) -> f64 {
        f64::from(self.priority.level()) * PRIORITY_WEIGHT
            + f64::from(self.urgency as u8) * URGENCY_WEIGHT
    }

    pub fn is_executable(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| completed.contains(d))
    }

    fn from_raw(raw: &Map<String, Value>, index: usize) -> Self {
        let goal_id =
            lenient::str_field(raw, &["goal_id", "id"]).unwrap_or_else(|| format!("goal_{}", index + 1));
        let description = lenient::str_field(raw, &["description"]).unwrap_or_else(|| goal_id.clone());
        let mut goal = Self::new(goal_id, description);
        goal.goal_type = raw
            .get("goal_type")
            .and_then(Value::as_str)
            .map(GoalType::parse)
            .unwrap_or(GoalType::Primary);
        goal.priority = raw
            .get("priority")
            .and_then(TaskPriority::from_value)
            .unwrap_or(TaskPriority::Medium);
        goal.urgency = raw
            .get("urgency")
            .and_then(GoalUrgency::from_value)
            .unwrap_or(GoalUrgency::Medium);
        goal.dependencies = lenient::string_list(raw, "dependencies");
        goal.success_criteria = lenient::string_list(raw, "success_criteria");
        goal.constraints = raw
            .get("constraints")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        goal
    }
}

/// A root goal plus everything it decomposes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalHierarchy {
    root_id: String,
    goals: Vec<Goal>,
    execution_order: Vec<String>,
}

impl GoalHierarchy {
    /// A hierarchy of one goal.
    pub fn single(root: Goal) -> Self {
        let mut hierarchy = Self {
            root_id: root.goal_id.clone(),
            goals: vec![root],
            execution_order: Vec::new(),
        };
        hierarchy.update_execution_order();
        hierarchy
    }

    /// Build from goals and `(parent, child)` pairs.
    ///
    /// The root is the first dependency-free primary goal, else the first goal.
    /// A child gains its parent as a dependency. Returns `None` when `goals` is empty.
    pub fn from_goals(goals: Vec<Goal>, relationships: &[(String, String)]) -> Option<Self> {
        let mut unique: Vec<Goal> = Vec::with_capacity(goals.len());
        for goal in goals {
            if unique.iter().any(|g| g.goal_id == goal.goal_id) {
                warn!(goal_id = %goal.goal_id, "Duplicate goal id dropped");
                continue;
            }
            unique.push(goal);
        }

        let root_id = unique
            .iter()
            .find(|g| g.goal_type == GoalType::Primary && g.dependencies.is_empty())
            .or_else(|| unique.first())?
            .goal_id
            .clone();

        let mut hierarchy = Self {
            root_id,
            goals: unique,
            execution_order: Vec::new(),
        };
        for (parent, child) in relationships {
            hierarchy.link(parent, child);
        }
        hierarchy.update_execution_order();
        Some(hierarchy)
    }

    fn link(&mut self, parent: &str, child: &str) {
        if !self.contains(parent) || !self.contains(child) || parent == child {
            return;
        }
        if let Some(p) = self.goal_mut(parent) {
            if !p.sub_goals.iter().any(|s| s == child) {
                p.sub_goals.push(child.to_string());
            }
        }
        if let Some(c) = self.goal_mut(child) {
            if !c.dependencies.iter().any(|d| d == parent) {
                c.dependencies.push(parent.to_string());
            }
        }
    }

    pub fn root(&self) -> Option<&Goal> {
        self.goal(&self.root_id)
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn goal(&self, goal_id: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.goal_id == goal_id)
    }

    pub fn contains(&self, goal_id: &str) -> bool {
        self.goal(goal_id).is_some()
    }

    fn goal_mut(&mut self, goal_id: &str) -> Option<&mut Goal> {
        self.goals.iter_mut().find(|g| g.goal_id == goal_id)
    }

    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Ids of completed goals.
    pub fn completed(&self) -> HashSet<String> {
        self.goals
            .iter()
            .filter(|g| g.status == TaskStatus::Completed)
            .map(|g| g.goal_id.clone())
            .collect()
    }

    /// Pending goals whose dependencies are all completed, best score first.
    pub fn next_executable_goals(&self) -> Vec<&Goal> {
        let completed = self.completed();
        let mut ready: Vec<&Goal> = self
            .goals
            .iter()
            .filter(|g| g.status == TaskStatus::Pending && g.is_executable(&completed))
            .collect();
        ready.sort_by(|a, b| b.combined_score().total_cmp(&a.combined_score()));
        ready
    }

    /// Replace the root goal's description.
    pub fn set_root_description(&mut self, description: impl Into<String>) {
        let root_id = self.root_id.clone();
        if let Some(root) = self.goal_mut(&root_id) {
            root.description = description.into();
            root.updated_at = Utc::now();
        }
    }

    pub fn set_status(&mut self, goal_id: &str, status: TaskStatus) -> bool {
        match self.goal_mut(goal_id) {
            Some(goal) => {
                goal.status = status;
                goal.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Kahn's algorithm, taking the highest-scoring ready goal each round.
    ///
    /// Dependencies outside the hierarchy are ignored. Goals caught in a cycle
    /// are appended afterwards by score.
    pub fn update_execution_order(&mut self) {
        let index: HashMap<&str, usize> = self
            .goals
            .iter()
            .enumerate()
            .map(|(i, g)| (g.goal_id.as_str(), i))
            .collect();
        let mut in_degree: Vec<usize> = self
            .goals
            .iter()
            .map(|g| {
                g.dependencies
                    .iter()
                    .filter(|d| index.contains_key(d.as_str()))
                    .count()
            })
            .collect();

        let mut ready: Vec<usize> = (0..self.goals.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut placed = vec![false; self.goals.len()];
        let mut order = Vec::with_capacity(self.goals.len());

        while !ready.is_empty() {
            let best = self.best_of(&ready);
            let current = ready.remove(best);
            placed[current] = true;
            let current_id = self.goals[current].goal_id.as_str();
            order.push(current_id.to_string());

            for (i, goal) in self.goals.iter().enumerate() {
                if placed[i] || ready.contains(&i) {
                    continue;
                }
                let hits = goal.dependencies.iter().filter(|d| *d == current_id).count();
                if hits > 0 {
                    in_degree[i] = in_degree[i].saturating_sub(hits);
                    if in_degree[i] == 0 {
                        ready.push(i);
                    }
                }
            }
        }

        let mut stuck: Vec<usize> = (0..self.goals.len()).filter(|&i| !placed[i]).collect();
        if !stuck.is_empty() {
            warn!(goals = stuck.len(), "Goal dependencies contain a cycle");
            while !stuck.is_empty() {
                let best = self.best_of(&stuck);
                let i = stuck.remove(best);
                order.push(self.goals[i].goal_id.clone());
            }
        }
        self.execution_order = order;
    }

    /// Position in `candidates` of the highest score; earlier goals win ties.
    fn best_of(&self, candidates: &[usize]) -> usize {
        let mut best = 0;
        for (pos, &i) in candidates.iter().enumerate() {
            let score = self.goals[i].combined_score();
            let best_i = candidates[best];
            let best_score = self.goals[best_i].combined_score();
            if score > best_score || (score == best_score && i < best_i) {
                best = pos;
            }
        }
        best
    }
}

/// Decomposes goals with an LLM and re-prioritizes them as execution goes.
pub struct GoalManager {
    provider: Arc<dyn Provider>,
    model: String,
}

impl GoalManager {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Split `goal` into a hierarchy. Never fails.
    pub async fn decompose_goal(
        &self,
        goal: &str,
        context: &AgentContext,
        tools: &[ToolMetadata],
    ) -> GoalHierarchy {
        info!(goal = %goal, "Decomposing goal");
        let request = ProviderRequest::new(
            &self.model,
            vec![Message::user(decomposition_prompt(goal, context, tools))],
        )
        .with_temperature(0.3)
        .json();

        let raw = match lenient::request_object(self.provider.as_ref(), request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Goal decomposition failed, using single goal");
                return Self::fallback_hierarchy(goal);
            }
        };

        let goals: Vec<Goal> = raw
            .get("goals")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .enumerate()
            .map(|(i, g)| Goal::from_raw(g, i))
            .collect();
        let relationships: Vec<(String, String)> = raw
            .get("relationships")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .filter_map(|r| {
                Some((
                    lenient::str_field(r, &["parent_id"])?,
                    lenient::str_field(r, &["child_id"])?,
                ))
            })
            .collect();

        match GoalHierarchy::from_goals(goals, &relationships) {
            Some(hierarchy) => {
                info!(goals = hierarchy.len(), "Goal decomposition finished");
                hierarchy
            }
            None => {
                warn!("Decomposition returned no goals, using single goal");
                Self::fallback_hierarchy(goal)
            }
        }
    }

    /// One primary goal with high priority and urgency.
    pub fn fallback_hierarchy(goal: &str) -> GoalHierarchy {
        let mut root = Goal::new("main_goal", goal)
            .with_priority(TaskPriority::High)
            .with_urgency(GoalUrgency::High);
        root.success_criteria = vec![format!("{goal} achieved")];
        GoalHierarchy::single(root)
    }

    /// Adjust pending goals for the current situation, then recompute the order.
    ///
    /// Under [`CRITICAL_REMAINING_SECS`] of remaining time, pending primary goals
    /// become critical and secondary ones high. Pending goals depending on a
    /// failed goal drop to low priority.
    pub fn reorder_goals(
        &self,
        hierarchy: &mut GoalHierarchy,
        remaining_time: f64,
        completed: &[String],
        failed: &[String],
    ) {
        for id in completed {
            hierarchy.set_status(id, TaskStatus::Completed);
        }
        for id in failed {
            hierarchy.set_status(id, TaskStatus::Failed);
        }

        let short_on_time = remaining_time < CRITICAL_REMAINING_SECS;
        for goal in hierarchy
            .goals
            .iter_mut()
            .filter(|g| g.status == TaskStatus::Pending)
        {
            if short_on_time {
                match goal.goal_type {
                    GoalType::Primary => goal.urgency = GoalUrgency::Critical,
                    GoalType::Secondary => goal.urgency = GoalUrgency::High,
                    GoalType::Prerequisite | GoalType::Optional => {}
                }
            }
            if goal.dependencies.iter().any(|d| failed.contains(d)) {
                goal.priority = TaskPriority::Low;
            }
            goal.updated_at = Utc::now();
        }
        hierarchy.update_execution_order();
        debug!(order = ?hierarchy.execution_order, "Goals reordered");
    }
}

fn decomposition_prompt(goal: &str, context: &AgentContext, tools: &[ToolMetadata]) -> String {
    format!(
        "Break the goal below into logical sub-goals.\n\n\
         Goal: {goal}\n\n\
         Available tools:\n{tools}\n\
         Context: {limits}\n\n\
         For each sub-goal give its type (primary, secondary, prerequisite, optional), \
         priority 1-4, urgency 1-4, dependencies by goal_id and success criteria.\n\n\
         Reply with JSON only:\n\
         {{\"goals\": [{{\"goal_id\": \"goal_1\", \"description\": \"...\", \"goal_type\": \"primary\", \
         \"priority\": 3, \"urgency\": 2, \"dependencies\": [], \"success_criteria\": [\"...\"], \
         \"constraints\": {{}}}}], \
         \"relationships\": [{{\"parent_id\": \"goal_1\", \"child_id\": \"goal_2\"}}]}}",
        tools = describe_tools(tools),
        limits = context.limits_summary(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::SequentialMockProvider;
    use serde_json::json;

    fn manager(provider: SequentialMockProvider) -> GoalManager {
        GoalManager::new(Arc::new(provider), "mock")
    }

    #[test]
    fn combined_score_weights() {
        let g = Goal::new("g", "d")
            .with_priority(TaskPriority::Critical)
            .with_urgency(GoalUrgency::Low);
        assert!((g.combined_score() - (4.0 * 0.6 + 1.0 * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn execution_order_respects_dependencies_then_score() {
        let goals = vec![
            Goal::new("a", "a").with_priority(TaskPriority::Low),
            Goal::new("b", "b").with_priority(TaskPriority::Critical),
            Goal::new("c", "c")
                .with_priority(TaskPriority::Critical)
                .with_urgency(GoalUrgency::Critical)
                .with_dependencies(["a"]),
        ];
        let h = GoalHierarchy::from_goals(goals, &[]).unwrap();
        assert_eq!(h.execution_order(), ["b", "a", "c"]);
        assert_eq!(h.root().unwrap().goal_id, "a");
    }

    #[test]
    fn relationships_add_dependencies() {
        let goals = vec![Goal::new("p", "parent"), Goal::new("k", "kid")];
        let h = GoalHierarchy::from_goals(goals, &[("p".into(), "k".into())]).unwrap();
        assert_eq!(h.goal("p").unwrap().sub_goals, vec!["k".to_string()]);
        assert_eq!(h.goal("k").unwrap().dependencies, vec!["p".to_string()]);
        assert_eq!(h.execution_order(), ["p", "k"]);
    }

    #[test]
    fn cycles_still_produce_full_order() {
        let goals = vec![
            Goal::new("x", "x").with_dependencies(["y"]),
            Goal::new("y", "y").with_dependencies(["x"]),
            Goal::new("z", "z"),
        ];
        let h = GoalHierarchy::from_goals(goals, &[]).unwrap();
        assert_eq!(h.execution_order(), ["z", "x", "y"]);
    }

    #[test]
    fn executable_needs_completed_dependencies() {
        let mut h = GoalHierarchy::from_goals(
            vec![Goal::new("a", "a"), Goal::new("b", "b").with_dependencies(["a"])],
            &[],
        )
        .unwrap();
        let ids: Vec<&str> = h.next_executable_goals().iter().map(|g| g.goal_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        h.set_status("a", TaskStatus::Completed);
        let ids: Vec<&str> = h.next_executable_goals().iter().map(|g| g.goal_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn decompose_builds_hierarchy() {
        let provider = SequentialMockProvider::jsons([json!({
            "goals": [
                {"goal_id": "find", "description": "find screenshots", "goal_type": "prerequisite",
                 "priority": 3, "urgency": 2},
                {"goal_id": "delete", "description": "delete them", "goal_type": "primary",
                 "priority": 4, "urgency": "3", "dependencies": ["find"]},
                {"goal_id": "report", "description": "report", "goal_type": "optional"}
            ],
            "relationships": [{"parent_id": "find", "child_id": "report"}]
        })]);
        let h = manager(provider)
            .decompose_goal("clean desktop", &AgentContext::new("clean desktop"), &[])
            .await;
        assert_eq!(h.len(), 3);
        // no dependency-free primary goal, so the first goal is root
        assert_eq!(h.root().unwrap().goal_id, "find");
        assert_eq!(h.goal("delete").unwrap().urgency, GoalUrgency::High);
        assert_eq!(h.execution_order()[0], "find");
        assert_eq!(h.goal("report").unwrap().dependencies, vec!["find".to_string()]);
    }

    #[tokio::test]
    async fn malformed_output_falls_back() {
        let h = manager(SequentialMockProvider::texts(["no idea"]))
            .decompose_goal("water the plants", &AgentContext::new("x"), &[])
            .await;
        assert_eq!(h.len(), 1);
        let root = h.root().unwrap();
        assert_eq!(root.goal_id, "main_goal");
        assert_eq!(root.description, "water the plants");
        assert_eq!(root.priority, TaskPriority::High);
        assert_eq!(h.execution_order(), ["main_goal"]);

        let h = manager(SequentialMockProvider::jsons([json!({"goals": []})]))
            .decompose_goal("x", &AgentContext::new("x"), &[])
            .await;
        assert_eq!(h.root().unwrap().goal_id, "main_goal");
    }

    #[test]
    fn reorder_escalates_and_demotes() {
        let goals = vec![
            Goal::new("base", "base").with_type(GoalType::Prerequisite),
            Goal::new("main", "main").with_dependencies(["base"]),
            Goal::new("side", "side").with_type(GoalType::Secondary),
            Goal::new("extra", "extra").with_type(GoalType::Optional),
        ];
        let mut h = GoalHierarchy::from_goals(goals, &[]).unwrap();
        let m = manager(SequentialMockProvider::new(vec![]));

        m.reorder_goals(&mut h, 30.0, &[], &["base".to_string()]);
        assert_eq!(h.goal("base").unwrap().status, TaskStatus::Failed);
        let main = h.goal("main").unwrap();
        assert_eq!(main.urgency, GoalUrgency::Critical);
        assert_eq!(main.priority, TaskPriority::Low);
        assert_eq!(h.goal("side").unwrap().urgency, GoalUrgency::High);
        assert_eq!(h.goal("extra").unwrap().urgency, GoalUrgency::Medium);
    }

    #[test]
    fn reorder_with_time_left_changes_nothing_but_status() {
        let mut h = GoalHierarchy::from_goals(
            vec![Goal::new("a", "a"), Goal::new("b", "b").with_type(GoalType::Secondary)],
            &[],
        )
        .unwrap();
        let m = manager(SequentialMockProvider::new(vec![]));
        m.reorder_goals(&mut h, 600.0, &["a".to_string()], &[]);
        assert_eq!(h.goal("a").unwrap().status, TaskStatus::Completed);
        assert_eq!(h.goal("b").unwrap().urgency, GoalUrgency::Medium);
    }
}
