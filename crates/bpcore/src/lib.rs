//! Core abstractions for the process-flow engine
//!
//! This crate holds the graph model, the per-run execution records, the error
//! types and the callback boundary that every other crate builds on. It does
//! not execute anything itself.

mod callbacks;
mod error;
pub mod events;
mod process;
mod state;
mod value;
mod workflow;

pub use callbacks::{evaluate_variable_condition, ExecutionCallbacks};
pub use error::{FlowError, NodeError, WorkflowError};
pub use process::{ProcessContext, ProcessHandler, ProcessMetadata};
pub use state::{
    ExecutionContext, ExecutionId, ExecutionStatus, GatewayBranchState, NodeExecutionState,
};
pub use value::Value;
pub use workflow::{
    Connection, ExclusiveConfig, JoinMode, NodeId, NodeKind, NodeSpec, ParallelConfig, Position,
    ProcessConfig, Workflow, WorkflowId,
};
pub use events::*;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
