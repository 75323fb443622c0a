//! # vigil-core
//!
//! Core types, traits, and primitives for the Vigil autonomous agent runtime.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod task;
pub mod tool;

pub use error::{Result, VigilError};
pub use event::{Event, EventBus, tool_label};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use task::{Lane, LaneCounters, TaskResult, TaskStatus};
pub use tool::{ToolCall, ToolHandler, ToolSpec};
