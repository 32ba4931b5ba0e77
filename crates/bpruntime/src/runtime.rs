use crate::executor::{EngineConfig, ExecutionReport, WorkflowEngine};
use crate::registry::ProcessRegistry;
use bpcore::{
    EventBus, ExecutionCallbacks, ExecutionContext, ExecutionEvent, FlowError, Value, Workflow,
    WorkflowError, WorkflowId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Main runtime for executing workflows.
///
/// Holds registered workflows, the callbacks shared by every run and the
/// event bus. Each execution gets its own [`WorkflowEngine`].
pub struct FlowRuntime {
    callbacks: Arc<dyn ExecutionCallbacks>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl FlowRuntime {
    /// Create a runtime dispatching process nodes through `registry`
    pub fn new(registry: ProcessRegistry) -> Self {
        Self::with_config(Arc::new(registry), RuntimeConfig::default())
    }

    pub fn with_config(callbacks: Arc<dyn ExecutionCallbacks>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            callbacks,
            event_bus,
            config,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a workflow, validating its graph first
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<WorkflowId, FlowError> {
        crate::plan::ExecutionPlan::build(&workflow)?;
        let id = workflow.id;
        tracing::info!("Registered workflow '{}' ({})", workflow.name, id);
        self.workflows.write().await.insert(id, workflow);
        Ok(id)
    }

    /// Execute a registered workflow by id
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        variables: HashMap<String, Value>,
    ) -> Result<ExecutionReport, FlowError> {
        let workflow = self
            .workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        self.execute(&workflow, variables).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &Workflow,
        variables: HashMap<String, Value>,
    ) -> Result<ExecutionReport, FlowError> {
        let context = ExecutionContext::new(workflow.id).with_variables(variables);
        let execution_id = context.execution_id;

        let callbacks: Arc<dyn ExecutionCallbacks> = Arc::new(
            self.event_bus
                .forwarder(execution_id, Arc::clone(&self.callbacks)),
        );
        let engine = WorkflowEngine::with_config(
            workflow.clone(),
            context,
            callbacks,
            self.config.engine.clone(),
        )?;

        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: workflow.id,
            timestamp: Utc::now(),
        });

        engine.execute_workflow().await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            event_buffer_size: 1000,
        }
    }
}
