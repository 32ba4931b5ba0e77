//! Workflow execution runtime
//!
//! This crate compiles workflows into execution plans, runs them with the
//! gateway-aware engine, dispatches process nodes through the registry and
//! wraps it all in the [`FlowRuntime`] façade.

mod coordinator;
mod executor;
pub mod plan;
mod registry;
mod runtime;
mod state;

pub use executor::{BranchOverflow, EngineConfig, ExecutionReport, WorkflowEngine};
pub use plan::{Branch, ExecutionPlan, GatewayPlan, ParallelGroup};
pub use registry::ProcessRegistry;
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use state::StateStore;
