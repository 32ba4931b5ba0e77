// Shared helpers for the engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bpcore::{
    ExecutionCallbacks, ExecutionContext, FlowError, NodeError, NodeExecutionState, NodeSpec,
    ProcessConfig, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub delay_ms: u64,
    pub fail: bool,
}

/// Callbacks that script process behaviour per node and record every call
#[derive(Default)]
pub struct Recorder {
    behaviors: HashMap<String, Behavior>,
    log: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, node_id: &str, delay_ms: u64) -> Self {
        self.behaviors.entry(node_id.to_string()).or_default().delay_ms = delay_ms;
        self
    }

    pub fn fail(mut self, node_id: &str) -> Self {
        self.behaviors.entry(node_id.to_string()).or_default().fail = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn push(&self, entry: String) {
        self.log.lock().expect("log lock").push(entry);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| e.as_str() == entry).count()
    }

    /// Assert `first` was recorded before `second`
    pub fn assert_before(&self, first: &str, second: &str) {
        let a = self.position(first).unwrap_or_else(|| panic!("{} not recorded", first));
        let b = self
            .position(second)
            .unwrap_or_else(|| panic!("{} not recorded", second));
        assert!(a < b, "expected {} before {}; log: {:?}", first, second, self.log());
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionCallbacks for Recorder {
    async fn on_node_start(&self, state: &NodeExecutionState) {
        self.push(format!("start:{}", state.node_id));
    }

    async fn on_node_complete(&self, state: &NodeExecutionState) {
        self.push(format!("complete:{}", state.node_id));
    }

    async fn on_node_error(&self, state: &NodeExecutionState, _error: &FlowError) {
        self.push(format!("error:{}", state.node_id));
    }

    async fn on_process_execution(
        &self,
        node: &NodeSpec,
        _config: &ProcessConfig,
        _context: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let behavior = self.behaviors.get(&node.id).cloned().unwrap_or_default();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if behavior.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(behavior.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if behavior.fail {
            Err(NodeError::ExecutionFailed(format!("{} failed", node.id)))
        } else {
            Ok(Value::String(node.id.clone()))
        }
    }

    async fn on_workflow_complete(&self, _context: &ExecutionContext) {
        self.push("workflow_complete".to_string());
    }

    async fn on_execution_error(&self, _context: &ExecutionContext, _error: &FlowError) {
        self.push("execution_error".to_string());
    }
}

/// Poll until `check` holds or the deadline passes
pub async fn eventually<F>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Route engine logs through the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
