// crates/bpruntime/tests/runtime_test.rs

use async_trait::async_trait;
use bpcore::{
    ExecutionEvent, ExecutionStatus, FlowError, JoinMode, NodeError, NodeSpec, ProcessContext,
    ProcessHandler, ProcessMetadata, Value, Workflow, WorkflowError,
};
use bpruntime::{BranchOverflow, EngineConfig, FlowRuntime, ProcessRegistry, RuntimeConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Returns the `greeting` variable, or fails when it is missing
struct Greet;

#[async_trait]
impl ProcessHandler for Greet {
    fn process_id(&self) -> &str {
        "test.greet"
    }

    async fn execute(&self, ctx: ProcessContext) -> Result<Value, NodeError> {
        ctx.variables
            .get("greeting")
            .cloned()
            .ok_or_else(|| NodeError::ExecutionFailed("no greeting".to_string()))
    }

    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata {
            description: "Echo the greeting variable".to_string(),
            category: "test".to_string(),
        }
    }
}

fn runtime() -> FlowRuntime {
    let mut registry = ProcessRegistry::new();
    registry.register(Arc::new(Greet));
    FlowRuntime::new(registry)
}

fn greeting_workflow() -> Workflow {
    let mut workflow = Workflow::new("greeting");
    workflow.add_node(NodeSpec::start("start"));
    workflow.add_node(NodeSpec::process("greet", "test.greet"));
    workflow.add_node(NodeSpec::end("end"));
    workflow.connect("start", "greet");
    workflow.connect("greet", "end");
    workflow
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_registered_workflow_runs_with_variables() {
    let runtime = runtime();
    let id = runtime
        .register_workflow(greeting_workflow())
        .await
        .expect("valid workflow");

    let mut variables = HashMap::new();
    variables.insert("greeting".to_string(), Value::from("hi"));
    let report = runtime
        .execute_workflow(id, variables)
        .await
        .expect("run succeeds");

    assert_eq!(report.status(), ExecutionStatus::Completed);
    assert_eq!(
        report.state("greet").and_then(|s| s.result.clone()),
        Some(Value::from("hi"))
    );
    assert_eq!(report.context.workflow_id, id);
}

#[tokio::test]
async fn test_unknown_workflow_id() {
    let err = runtime()
        .execute_workflow(uuid::Uuid::new_v4(), HashMap::new())
        .await
        .expect_err("not registered");
    assert!(matches!(err, FlowError::Workflow(WorkflowError::NotFound(_))));
}

#[tokio::test]
async fn test_invalid_workflow_is_not_registered() {
    let mut workflow = greeting_workflow();
    workflow.connect("end", "ghost");
    let err = runtime()
        .register_workflow(workflow)
        .await
        .expect_err("dangling connection");
    assert!(matches!(err, FlowError::Workflow(WorkflowError::NodeNotFound(_))));
}

#[tokio::test]
async fn test_unknown_process_fails_the_node() {
    let mut workflow = Workflow::new("unknown");
    workflow.add_node(NodeSpec::start("start"));
    workflow.add_node(NodeSpec::process("mystery", "no.such.process"));
    workflow.connect("start", "mystery");

    let err = runtime()
        .execute(&workflow, HashMap::new())
        .await
        .expect_err("unknown process");
    assert!(matches!(
        err,
        FlowError::Node { source: NodeError::UnknownProcess(ref id), .. } if id == "no.such.process"
    ));
}

#[tokio::test]
async fn test_events_are_forwarded_for_a_run() {
    let runtime = runtime();
    let mut rx = runtime.subscribe_events();

    let mut variables = HashMap::new();
    variables.insert("greeting".to_string(), Value::from("hello"));
    let report = runtime
        .execute(&greeting_workflow(), variables)
        .await
        .expect("run succeeds");

    let events = drain(&mut rx);
    let execution_id = report.context.execution_id;

    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::WorkflowStarted { execution_id: id, .. }) if *id == execution_id
    ));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::WorkflowCompleted { .. })
    ));

    let started = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeStarted { .. }))
        .count();
    let completed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeCompleted { node_id, .. } => Some(node_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, 3);
    assert_eq!(completed, vec!["start", "greet", "end"]);
}

#[tokio::test]
async fn test_failure_events() {
    let runtime = runtime();
    let mut rx = runtime.subscribe_events();

    runtime
        .execute(&greeting_workflow(), HashMap::new())
        .await
        .expect_err("greeting missing");

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeFailed { node_id, status: ExecutionStatus::Failed, .. } if node_id == "greet"
    )));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::WorkflowFailed { .. })
    ));
}

#[tokio::test]
async fn test_engine_config_flows_through_runtime() {
    let mut registry = ProcessRegistry::new();
    registry.register(Arc::new(Greet));
    let config = RuntimeConfig {
        engine: EngineConfig {
            branch_overflow: BranchOverflow::Queue,
            ..EngineConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_config(Arc::new(registry), config);

    let mut workflow = Workflow::new("queued");
    workflow.add_node(NodeSpec::start("start"));
    workflow.add_node(NodeSpec::parallel("g", JoinMode::All).with_max_concurrency(1));
    workflow.add_node(NodeSpec::process("one", "test.greet"));
    workflow.add_node(NodeSpec::process("two", "test.greet"));
    workflow.connect("start", "g");
    workflow.connect("g", "one");
    workflow.connect("g", "two");

    let mut variables = HashMap::new();
    variables.insert("greeting".to_string(), Value::from("hey"));
    let report = runtime.execute(&workflow, variables).await.expect("run");

    assert!(report.state("one").expect("one").is_completed());
    assert!(report.state("two").expect("two").is_completed());
}

#[test]
fn test_runtime_config_deserializes_with_defaults() {
    let config: RuntimeConfig =
        serde_json::from_str(r#"{"engine": {"cancel_losers": true}}"#).expect("config");
    assert!(config.engine.cancel_losers);
    assert!(!config.engine.reject_cycles);
    assert_eq!(config.engine.branch_overflow, BranchOverflow::Skip);
    assert_eq!(config.event_buffer_size, 1000);
}
