//! Goal execution for Steward.
//!
//! A goal goes in as an [`AgentContext`] and comes back as an
//! [`AgentResult`]. In between, the [`ReactEngine`] either reasons one
//! step at a time (thought, action, observation) or plans the goal up
//! front and executes the plan, adapting it when steps fail.
//!
//! The model and the tools are external: anything implementing
//! [`steward_core::provider::Provider`] and
//! [`steward_core::tool::ToolExecutor`] can drive the engine.
//!
//! Per-attempt state lives in the [`Scratchpad`]; plans, goals and the
//! adapter live under [`planning`]; the optional [`canvas`] records
//! attempts on disk so a repeated request can be recognized.

pub mod canvas;
pub mod lenient;
pub mod patterns;
pub mod planning;
pub mod state;

pub use canvas::{CanvasStep, CanvasStore, TaskCanvas};
pub use patterns::{AgentContext, AgentResult, ErrorCode, ReactEngine};
pub use planning::{ExecutionPlan, GoalHierarchy, PlanStep, PlanningEngine, TaskStatus};
pub use state::{Action, ActionKind, ActionStatus, Observation, Scratchpad, Step, Thought};
