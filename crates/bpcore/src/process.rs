use crate::{ExecutionId, NodeError, NodeId, ProcessConfig, Value, WorkflowId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Business logic behind a `process` node, looked up by process id
#[async_trait]
pub trait ProcessHandler: Send + Sync {
    /// Identifier referenced by `ProcessConfig::process_id` (e.g. "debug.log")
    fn process_id(&self) -> &str;

    async fn execute(&self, ctx: ProcessContext) -> Result<Value, NodeError>;

    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata::default()
    }
}

/// Everything a handler gets to see about the node it runs for
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub config: ProcessConfig,
    /// Snapshot of the run variables at dispatch time
    pub variables: HashMap<String, Value>,
}

impl ProcessContext {
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.config.parameters.get(name)
    }

    /// Get a parameter or return a configuration error
    pub fn require_parameter(&self, name: &str) -> Result<&Value, NodeError> {
        self.parameter(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing parameter: {}", name)))
    }

    pub fn parameter_or(&self, name: &str, default: Value) -> Value {
        self.parameter(name).cloned().unwrap_or(default)
    }
}

/// Descriptive information about a process handler
#[derive(Debug, Clone)]
pub struct ProcessMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ProcessMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
