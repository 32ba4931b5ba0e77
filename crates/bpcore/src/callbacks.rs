use crate::{
    ExecutionContext, FlowError, NodeError, NodeExecutionState, NodeSpec, ProcessConfig, Value,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Everything the engine needs from the outside world.
///
/// Lifecycle notifications default to no-ops; only process execution must be
/// supplied. Implementations are shared across concurrently running branches,
/// so they must be `Send + Sync`.
#[async_trait]
pub trait ExecutionCallbacks: Send + Sync {
    async fn on_node_start(&self, _state: &NodeExecutionState) {}

    async fn on_node_complete(&self, _state: &NodeExecutionState) {}

    async fn on_node_error(&self, _state: &NodeExecutionState, _error: &FlowError) {}

    /// Run the business logic behind a `process` node
    async fn on_process_execution(
        &self,
        node: &NodeSpec,
        config: &ProcessConfig,
        context: &ExecutionContext,
    ) -> Result<Value, NodeError>;

    /// Decide an exclusive gateway's condition
    async fn evaluate_condition(
        &self,
        _node: &NodeSpec,
        condition: &str,
        context: &ExecutionContext,
    ) -> Result<bool, NodeError> {
        evaluate_variable_condition(condition, &context.variables)
    }

    async fn on_workflow_complete(&self, _context: &ExecutionContext) {}

    async fn on_execution_error(&self, _context: &ExecutionContext, _error: &FlowError) {}
}

/// Minimal condition language over the run's variables.
///
/// Accepts `true`, `false`, a variable name, or a `!`-negated variable name.
/// Variables are judged with [`Value::is_truthy`]; an unknown variable is an
/// error rather than `false`.
pub fn evaluate_variable_condition(
    condition: &str,
    variables: &HashMap<String, Value>,
) -> Result<bool, NodeError> {
    let condition = condition.trim();
    let (negated, name) = match condition.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, condition),
    };

    let value = match name {
        "true" => true,
        "false" => false,
        "" => return Err(NodeError::Condition("empty condition".to_string())),
        _ => variables
            .get(name)
            .map(Value::is_truthy)
            .ok_or_else(|| NodeError::Condition(format!("unknown variable '{}'", name)))?,
    };

    Ok(value != negated)
}
