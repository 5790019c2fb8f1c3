//! Tool registration and dispatch for model-issued function calls.

pub mod dispatch;
pub mod registry;

pub use dispatch::{CallState, FailureKind, ToolCall, ToolDispatcher, ToolResult};
pub use registry::{
    RegisteredTool, ToolContext, ToolDefinition, ToolOutput, ToolRegistry, validate_arguments,
};
