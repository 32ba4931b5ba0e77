use async_trait::async_trait;
use bpcore::{
    ExecutionCallbacks, ExecutionContext, FlowError, NodeError, NodeExecutionState, NodeSpec,
    ProcessConfig, ProcessContext, ProcessHandler, ProcessMetadata, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available process handlers.
///
/// The registry is itself an [`ExecutionCallbacks`] implementation: process
/// nodes are dispatched to the handler registered under their `process_id`,
/// and lifecycle notifications are logged.
pub struct ProcessRegistry {
    handlers: HashMap<String, Arc<dyn ProcessHandler>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any earlier one with the same id
    pub fn register(&mut self, handler: Arc<dyn ProcessHandler>) {
        let process_id = handler.process_id().to_string();
        tracing::info!("Registering process: {}", process_id);
        if self.handlers.insert(process_id.clone(), handler).is_some() {
            tracing::warn!("Process {} was already registered; replaced", process_id);
        }
    }

    pub fn get(&self, process_id: &str) -> Option<&Arc<dyn ProcessHandler>> {
        self.handlers.get(process_id)
    }

    /// Registered process ids, sorted
    pub fn list_process_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get_metadata(&self, process_id: &str) -> Option<ProcessMetadata> {
        self.handlers.get(process_id).map(|h| h.metadata())
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionCallbacks for ProcessRegistry {
    async fn on_node_start(&self, state: &NodeExecutionState) {
        tracing::debug!("Node {} started", state.node_id);
    }

    async fn on_node_complete(&self, state: &NodeExecutionState) {
        tracing::debug!(
            "Node {} completed ({:?}ms)",
            state.node_id,
            state.duration_ms()
        );
    }

    async fn on_node_error(&self, state: &NodeExecutionState, error: &FlowError) {
        tracing::warn!("Node {} failed: {}", state.node_id, error);
    }

    async fn on_process_execution(
        &self,
        node: &NodeSpec,
        config: &ProcessConfig,
        context: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let handler = self
            .handlers
            .get(&config.process_id)
            .ok_or_else(|| NodeError::UnknownProcess(config.process_id.clone()))?;

        handler
            .execute(ProcessContext {
                workflow_id: context.workflow_id,
                execution_id: context.execution_id,
                node_id: node.id.clone(),
                config: config.clone(),
                variables: context.variables.clone(),
            })
            .await
    }

    async fn on_workflow_complete(&self, context: &ExecutionContext) {
        tracing::info!("Execution {} completed", context.execution_id);
    }

    async fn on_execution_error(&self, context: &ExecutionContext, error: &FlowError) {
        tracing::error!("Execution {} failed: {}", context.execution_id, error);
    }
}
