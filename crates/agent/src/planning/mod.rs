//! Plan-driven execution: plan graph, planner, static validation,
//! placeholder resolution, goal decomposition and dynamic adaptation.

pub mod adapter;
pub mod engine;
pub mod goal;
pub mod placeholder;
pub mod plan;
pub mod validator;

pub use adapter::{
    AdaptationAction, AdaptationEvent, AdaptationHistory, AdaptationStrategy, AdaptationTrigger,
    DynamicAdapter, Modification, ModificationKind, StepExecution,
};
pub use engine::{PlanningEngine, describe_tools};
pub use goal::{Goal, GoalHierarchy, GoalManager, GoalType, GoalUrgency};
pub use placeholder::{DependencyResults, PlaceholderResolver, representative_value};
pub use plan::{
    ExecutionPlan, ExecutionStrategy, PlanStep, StepActionType, TaskPriority, TaskStatus,
};
pub use validator::{
    EXPLORATION_STEP_ID, IssueKind, PlanCorrector, PlanValidator, Severity, ValidationIssue,
    ValidationReport, is_file_related_goal,
};
