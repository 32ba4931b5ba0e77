use crate::NodeId;
use thiserror::Error;

/// Errors surfaced by a workflow run
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Node {node_id} cannot run: dependency {dependency} has not completed")]
    DependencyNotMet { node_id: NodeId, dependency: NodeId },

    #[error("Node {0} has already started in this run")]
    NodeAlreadyStarted(NodeId),

    #[error("Branch '{port}' of gateway {gateway_id} was cancelled")]
    BranchCancelled { gateway_id: NodeId, port: String },

    #[error("All {failures} branches of gateway {gateway_id} failed; last error: {last}")]
    AllBranchesFailed {
        gateway_id: NodeId,
        failures: usize,
        last: Box<FlowError>,
    },

    #[error("Execution error: {0}")]
    Execution(String),
}

impl FlowError {
    /// Id of the node the error originated from, when there is one.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            FlowError::Node { node_id, .. }
            | FlowError::DependencyNotMet { node_id, .. }
            | FlowError::NodeAlreadyStarted(node_id) => Some(node_id),
            FlowError::BranchCancelled { gateway_id, .. }
            | FlowError::AllBranchesFailed { gateway_id, .. } => Some(gateway_id),
            FlowError::Workflow(_) | FlowError::Execution(_) => None,
        }
    }
}

/// Failures reported by the caller-supplied callbacks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    #[error("Condition error: {0}")]
    Condition(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Workflow has no start node")]
    NoStartNode,

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,
}
