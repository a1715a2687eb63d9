//! Execution patterns: the ReAct engine and the pieces it is built from.
//!
//! - **thought**: one model call per iteration producing the next thought
//! - **decision**: tool call or final answer, with a forced-tool retry
//! - **params**: parameter repair and validation before a tool runs
//! - **observation**: tool results into the scratchpad, plus answer synthesis
//! - **react**: the plain loop and the plan-driven loop

pub mod decision;
pub mod observation;
pub mod outcome;
pub mod params;
pub mod react;
pub mod thought;

pub use decision::{ActionDecider, parse_decision};
pub use observation::{derive_lessons, describe_data, partial_summary, success_answer, timeout_summary};
pub use outcome::{AgentContext, AgentResult, ErrorCode};
pub use params::{ParamError, validate_tool_params};
pub use react::{DEFAULT_MAX_STEP_FAILURES, ReactEngine};
pub use thought::{ThoughtGenerator, reasoning_depth};

#[cfg(test)]
pub(crate) mod test_helpers;
