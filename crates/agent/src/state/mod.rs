//! Per-attempt execution state: the scratchpad ledger and operation keys.

pub mod operation_key;
pub mod scratchpad;

pub use operation_key::operation_key;
pub use scratchpad::{
    Action, ActionKind, ActionStatus, Observation, Scratchpad, Step, Thought,
};
