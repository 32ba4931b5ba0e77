use crate::{
    ExecutionCallbacks, ExecutionContext, ExecutionId, ExecutionStatus, FlowError, NodeError,
    NodeExecutionState, NodeId, NodeSpec, ProcessConfig, Value, WorkflowId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events mirrored from the callback boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: ExecutionId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        result: Option<Value>,
        duration_ms: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        status: ExecutionStatus,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel for execution events
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Send an event; dropped when nobody listens
    pub fn emit(&self, event: ExecutionEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!("No subscribers for event {:?}", event);
        }
    }

    /// Wrap callbacks of one run so every notification is also broadcast
    pub fn forwarder(
        self: &Arc<Self>,
        execution_id: ExecutionId,
        inner: Arc<dyn ExecutionCallbacks>,
    ) -> EventForwarder {
        EventForwarder {
            execution_id,
            bus: Arc::clone(self),
            inner,
        }
    }
}

/// Callback decorator that emits an [`ExecutionEvent`] before delegating
pub struct EventForwarder {
    execution_id: ExecutionId,
    bus: Arc<EventBus>,
    inner: Arc<dyn ExecutionCallbacks>,
}

#[async_trait]
impl ExecutionCallbacks for EventForwarder {
    async fn on_node_start(&self, state: &NodeExecutionState) {
        self.bus.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution_id,
            node_id: state.node_id.clone(),
            timestamp: Utc::now(),
        });
        self.inner.on_node_start(state).await;
    }

    async fn on_node_complete(&self, state: &NodeExecutionState) {
        self.bus.emit(ExecutionEvent::NodeCompleted {
            execution_id: self.execution_id,
            node_id: state.node_id.clone(),
            result: state.result.clone(),
            duration_ms: state.duration_ms(),
            timestamp: Utc::now(),
        });
        self.inner.on_node_complete(state).await;
    }

    async fn on_node_error(&self, state: &NodeExecutionState, error: &FlowError) {
        self.bus.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node_id: state.node_id.clone(),
            status: state.status,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.inner.on_node_error(state, error).await;
    }

    async fn on_process_execution(
        &self,
        node: &NodeSpec,
        config: &ProcessConfig,
        context: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        self.inner.on_process_execution(node, config, context).await
    }

    async fn evaluate_condition(
        &self,
        node: &NodeSpec,
        condition: &str,
        context: &ExecutionContext,
    ) -> Result<bool, NodeError> {
        self.inner.evaluate_condition(node, condition, context).await
    }

    async fn on_workflow_complete(&self, context: &ExecutionContext) {
        self.bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: self.execution_id,
            duration_ms: (Utc::now() - context.start_time).num_milliseconds(),
            timestamp: Utc::now(),
        });
        self.inner.on_workflow_complete(context).await;
    }

    async fn on_execution_error(&self, context: &ExecutionContext, error: &FlowError) {
        self.bus.emit(ExecutionEvent::WorkflowFailed {
            execution_id: self.execution_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.inner.on_execution_error(context, error).await;
    }
}
