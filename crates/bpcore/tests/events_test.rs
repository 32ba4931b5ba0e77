// crates/bpcore/tests/events_test.rs

use async_trait::async_trait;
use bpcore::{
    EventBus, ExecutionCallbacks, ExecutionContext, ExecutionEvent, ExecutionStatus, FlowError,
    NodeError, NodeExecutionState, NodeSpec, ProcessConfig, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counting {
    notifications: AtomicUsize,
}

#[async_trait]
impl ExecutionCallbacks for Counting {
    async fn on_node_start(&self, _state: &NodeExecutionState) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_node_error(&self, _state: &NodeExecutionState, _error: &FlowError) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_process_execution(
        &self,
        node: &NodeSpec,
        _config: &ProcessConfig,
        _context: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        Ok(Value::String(node.id.clone()))
    }
}

#[tokio::test]
async fn test_forwarder_emits_then_delegates() {
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe();
    let inner = Arc::new(Counting::default());
    let context = ExecutionContext::new(uuid::Uuid::new_v4());
    let forwarder = bus.forwarder(context.execution_id, inner.clone());

    let state = NodeExecutionState::running("a");
    forwarder.on_node_start(&state).await;

    let mut failed = state.clone();
    let err = FlowError::Execution("boom".to_string());
    failed.fail(&err);
    forwarder.on_node_error(&failed, &err).await;

    assert_eq!(inner.notifications.load(Ordering::SeqCst), 2);

    match rx.recv().await.expect("started event") {
        ExecutionEvent::NodeStarted {
            execution_id,
            node_id,
            ..
        } => {
            assert_eq!(execution_id, context.execution_id);
            assert_eq!(node_id, "a");
        }
        other => panic!("unexpected event {:?}", other),
    }
    match rx.recv().await.expect("failed event") {
        ExecutionEvent::NodeFailed { status, error, .. } => {
            assert_eq!(status, ExecutionStatus::Failed);
            assert!(error.contains("boom"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_forwarder_passes_process_results_through() {
    let bus = Arc::new(EventBus::new(4));
    let context = ExecutionContext::new(uuid::Uuid::new_v4());
    let forwarder = bus.forwarder(context.execution_id, Arc::new(Counting::default()));

    let node = NodeSpec::process("p", "anything");
    let config = ProcessConfig::new("anything");
    let result = forwarder
        .on_process_execution(&node, &config, &context)
        .await
        .expect("delegated");
    assert_eq!(result, Value::from("p"));

    let decided = forwarder
        .evaluate_condition(&node, "true", &context)
        .await
        .expect("default evaluator");
    assert!(decided);
}

#[test]
fn test_emit_without_subscribers_is_silent() {
    let bus = EventBus::new(1);
    bus.emit(ExecutionEvent::WorkflowFailed {
        execution_id: uuid::Uuid::new_v4(),
        error: "nobody listens".to_string(),
        timestamp: chrono::Utc::now(),
    });
}

#[test]
fn test_events_serialize_with_type_tag() {
    let event = ExecutionEvent::NodeStarted {
        execution_id: uuid::Uuid::nil(),
        node_id: "a".to_string(),
        timestamp: chrono::Utc::now(),
    };
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["type"], "NodeStarted");
    assert_eq!(json["node_id"], "a");
}
