//! # Steward Core
//!
//! Domain types, traits, and error definitions for the Steward agent.
//! This crate defines the two collaborator seams the execution engine
//! consumes, the language-model [`Provider`] and the [`ToolExecutor`],
//! plus the message, event, and error types shared by every other crate.
//!
//! ## Design Philosophy
//!
//! Every external capability is a trait here. Implementations live outside
//! the engine, which keeps the control loop testable with scripted mocks
//! and lets a driving application plug in its own LLM client and tools.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{
    ParameterType, Tool, ToolExecutor, ToolMetadata, ToolParameter, ToolRegistry, ToolResult,
};
