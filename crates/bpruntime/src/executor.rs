use crate::coordinator::Scope;
use crate::plan::ExecutionPlan;
use crate::state::StateStore;
use bpcore::{
    ExecutionCallbacks, ExecutionContext, ExecutionStatus, FlowError, NodeExecutionState, NodeId,
    NodeKind, NodeSpec, ProcessConfig, Workflow, WorkflowError,
};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Tuning knobs for a single engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Refuse cyclic graphs at construction instead of tolerating them
    pub reject_cycles: bool,
    /// What an `all` join does with branches beyond its concurrency cap
    pub branch_overflow: BranchOverflow,
    /// Cancel still-running branches once a join has settled
    pub cancel_losers: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchOverflow {
    /// Branches beyond the cap are never started
    #[default]
    Skip,
    /// Every branch runs, at most `cap` at a time
    Queue,
}

/// Outcome of a run as seen from the top level
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub context: ExecutionContext,
    pub states: HashMap<NodeId, NodeExecutionState>,
    pub released_joins: Vec<NodeId>,
}

impl ExecutionReport {
    pub fn status(&self) -> ExecutionStatus {
        self.context.status
    }

    pub fn state(&self, node_id: &str) -> Option<&NodeExecutionState> {
        self.states.get(node_id)
    }

    pub fn completed_nodes(&self) -> usize {
        self.states.values().filter(|s| s.is_completed()).count()
    }
}

/// Executes one run of a workflow.
///
/// The plan is compiled once in the constructor. An engine owns a fresh
/// state store and may execute only once; build a new engine for every run.
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) workflow: Workflow,
    pub(crate) nodes: HashMap<NodeId, NodeSpec>,
    pub(crate) plan: ExecutionPlan,
    pub(crate) store: StateStore,
    pub(crate) context: RwLock<ExecutionContext>,
    pub(crate) callbacks: Arc<dyn ExecutionCallbacks>,
    pub(crate) config: EngineConfig,
    started: AtomicBool,
}

impl WorkflowEngine {
    pub fn new(
        workflow: Workflow,
        context: ExecutionContext,
        callbacks: Arc<dyn ExecutionCallbacks>,
    ) -> Result<Self, FlowError> {
        Self::with_config(workflow, context, callbacks, EngineConfig::default())
    }

    pub fn with_config(
        workflow: Workflow,
        context: ExecutionContext,
        callbacks: Arc<dyn ExecutionCallbacks>,
        config: EngineConfig,
    ) -> Result<Self, FlowError> {
        let plan = ExecutionPlan::build(&workflow)?;
        if config.reject_cycles {
            plan.validate_acyclic()?;
        }

        let nodes = workflow
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();

        Ok(Self {
            inner: Arc::new(EngineInner {
                workflow,
                nodes,
                plan,
                store: StateStore::new(),
                context: RwLock::new(context),
                callbacks,
                config,
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.inner.plan
    }

    pub fn workflow(&self) -> &Workflow {
        &self.inner.workflow
    }

    /// Walk the workflow from its start node.
    ///
    /// Returns once the start node's execution path has finished. Branches
    /// that lost a `first`/`any` join may still be running in the background
    /// and keep updating state; use [`WorkflowEngine::report`] to look again.
    pub async fn execute_workflow(&self) -> Result<ExecutionReport, FlowError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(FlowError::Execution(
                "engine has already executed; build a new engine for each run".to_string(),
            ));
        }

        let execution_id = {
            let mut ctx = inner.context.write().await;
            ctx.status = ExecutionStatus::Running;
            ctx.start_time = Utc::now();
            ctx.execution_id
        };
        info!(
            "Starting workflow '{}' ({}), execution {}",
            inner.workflow.name, inner.workflow.id, execution_id
        );

        let result = match inner.plan.start_node.clone() {
            Some(start) => inner.execute_node(start, None, Scope::Root).await,
            None => Err(WorkflowError::NoStartNode.into()),
        };

        match result {
            Ok(()) => {
                let report = self.report().await;
                info!(
                    "Execution {} returned with status {} ({} nodes completed)",
                    execution_id,
                    report.status(),
                    report.completed_nodes()
                );
                Ok(report)
            }
            Err(err) => {
                let context = {
                    let mut ctx = inner.context.write().await;
                    ctx.status = ExecutionStatus::Failed;
                    ctx.clone()
                };
                error!("Execution {} failed: {}", execution_id, err);
                inner.callbacks.on_execution_error(&context, &err).await;
                Err(err)
            }
        }
    }

    pub async fn report(&self) -> ExecutionReport {
        ExecutionReport {
            context: self.context().await,
            states: self.inner.store.snapshot().await,
            released_joins: self.inner.store.released_joins().await,
        }
    }

    pub async fn context(&self) -> ExecutionContext {
        self.inner.context.read().await.clone()
    }

    pub async fn node_state(&self, node_id: &str) -> Option<NodeExecutionState> {
        self.inner.store.get(node_id).await
    }
}

/// One unit of work on a sequential path
pub(crate) enum Step {
    /// Execute a node; `via` is the gateway dispatching it as a branch entry
    Run { node_id: NodeId, via: Option<NodeId> },
    /// Close an exclusive gateway once its chosen branch's path finished
    SettleExclusive { gateway_id: NodeId, port: String },
}

impl Step {
    pub(crate) fn enter(node_id: NodeId) -> Self {
        Step::Run { node_id, via: None }
    }
}

impl EngineInner {
    /// Boxed entry point so execution can recurse into spawned branches
    pub(crate) fn execute_node(
        self: &Arc<Self>,
        node_id: NodeId,
        via: Option<NodeId>,
        scope: Scope,
    ) -> BoxFuture<'static, Result<(), FlowError>> {
        self.execute_steps(vec![Step::Run { node_id, via }], scope)
    }

    /// Drive a sequential path from a work list.
    ///
    /// Steps run depth first: a node's follow-up steps go on top of the list
    /// in declaration order, so each successor and everything downstream of
    /// it finishes before the next successor starts. The first error stops
    /// the path; exclusive gateways still waiting on it fail with it.
    pub(crate) fn execute_steps(
        self: &Arc<Self>,
        steps: Vec<Step>,
        scope: Scope,
    ) -> BoxFuture<'static, Result<(), FlowError>> {
        let this = Arc::clone(self);
        async move {
            let mut pending: Vec<Step> = steps.into_iter().rev().collect();
            while let Some(step) = pending.pop() {
                let next = match step {
                    Step::Run { node_id, via } => {
                        this.run_node(&node_id, via.as_deref(), &scope).await
                    }
                    Step::SettleExclusive { gateway_id, port } => {
                        this.settle_exclusive(&gateway_id, &port).await;
                        Ok(Vec::new())
                    }
                };
                match next {
                    Ok(next) => pending.extend(next.into_iter().rev()),
                    Err(err) => {
                        // innermost gateway first
                        while let Some(step) = pending.pop() {
                            if let Step::SettleExclusive { gateway_id, port } = step {
                                this.abort_exclusive(&gateway_id, &port, &err).await;
                            }
                        }
                        return Err(err);
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn run_node(
        self: &Arc<Self>,
        node_id: &str,
        via: Option<&str>,
        scope: &Scope,
    ) -> Result<Vec<Step>, FlowError> {
        let node = self
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;

        scope.check_cancelled()?;

        if self.plan.is_join(node_id) {
            return self.arrive_at_join(node_id, via, scope).await;
        }

        // `via` is the gateway dispatching this node as a branch entry; it is
        // still running at this point and counts as satisfied.
        let dependencies = self.plan.dependencies_of(node_id);
        if let Some(dependency) = self.store.unmet_dependency(dependencies, via).await {
            warn!(
                "Node {} asked to run before dependency {} completed",
                node_id, dependency
            );
            return Err(FlowError::DependencyNotMet {
                node_id: node_id.to_string(),
                dependency,
            });
        }

        debug!("Executing {} node {}", node.kind.label(), node_id);
        match &node.kind {
            NodeKind::Start => self.run_start(&node, scope).await,
            NodeKind::Process(config) => self.run_process(&node, config, scope).await,
            NodeKind::ParallelGateway(_) => self.run_parallel_gateway(&node, scope).await,
            NodeKind::ExclusiveGateway(config) => self.run_exclusive_gateway(&node, config).await,
            NodeKind::End => self.run_end(&node).await,
        }
    }

    async fn run_start(&self, node: &NodeSpec, scope: &Scope) -> Result<Vec<Step>, FlowError> {
        let state = self.store.begin(&node.id, false).await?;
        self.callbacks.on_node_start(&state).await;

        let state = self.store.complete(&node.id, None).await;
        self.callbacks.on_node_complete(&state).await;

        Ok(self.downstream(&node.id, scope).await)
    }

    async fn run_process(
        &self,
        node: &NodeSpec,
        config: &ProcessConfig,
        scope: &Scope,
    ) -> Result<Vec<Step>, FlowError> {
        let state = self.store.begin(&node.id, false).await?;
        self.callbacks.on_node_start(&state).await;

        debug!(
            "Dispatching process '{}' for node {} (timeout: {:?}ms, retries: {})",
            config.process_id, node.id, config.timeout_ms, config.retry_count
        );
        let context = self.context_snapshot().await;

        match self
            .callbacks
            .on_process_execution(node, config, &context)
            .await
        {
            Ok(result) => {
                let state = self.store.complete(&node.id, Some(result)).await;
                info!(
                    "Node {} completed in {}ms",
                    node.id,
                    state.duration_ms().unwrap_or_default()
                );
                self.callbacks.on_node_complete(&state).await;
                Ok(self.downstream(&node.id, scope).await)
            }
            Err(source) => {
                let err = FlowError::Node {
                    node_id: node.id.clone(),
                    source,
                };
                self.fail_node(&node.id, err).await
            }
        }
    }

    async fn run_end(&self, node: &NodeSpec) -> Result<Vec<Step>, FlowError> {
        let state = self.store.begin(&node.id, false).await?;
        self.callbacks.on_node_start(&state).await;

        let state = self.store.complete(&node.id, None).await;
        let context = {
            let mut ctx = self.context.write().await;
            ctx.status = ExecutionStatus::Completed;
            ctx.clone()
        };
        self.callbacks.on_node_complete(&state).await;

        info!("Workflow {} reached end node {}", context.workflow_id, node.id);
        self.callbacks.on_workflow_complete(&context).await;
        Ok(Vec::new())
    }

    /// Successors to run next, in declaration order.
    ///
    /// Inside a branch, join gateways are not entered; they are handed to the
    /// branch's frontier for the coordinator to drive after the join.
    async fn downstream(&self, node_id: &str, scope: &Scope) -> Vec<Step> {
        let mut next = Vec::new();
        for conn in self.plan.successors_of(node_id) {
            if scope.is_branch() && self.plan.is_join(&conn.to_node) {
                scope.defer(&conn.to_node).await;
            } else {
                next.push(Step::enter(conn.to_node.clone()));
            }
        }
        next
    }

    async fn arrive_at_join(
        &self,
        join_id: &str,
        via: Option<&str>,
        scope: &Scope,
    ) -> Result<Vec<Step>, FlowError> {
        let dependencies: Vec<NodeId> = self
            .plan
            .dependencies_of(join_id)
            .iter()
            .filter(|dep| Some(dep.as_str()) != via)
            .cloned()
            .collect();

        if !self.store.try_release_join(join_id, &dependencies).await {
            debug!("Join {} waiting for remaining inputs", join_id);
            return Ok(Vec::new());
        }

        info!("Join {} released", join_id);
        Ok(self.downstream(join_id, scope).await)
    }

    /// Record a node failure and notify
    pub(crate) async fn mark_failed(&self, node_id: &str, err: &FlowError) {
        let state = self.store.fail(node_id, err).await;
        error!("Node {} failed: {}", node_id, err);
        self.callbacks.on_node_error(&state, err).await;
    }

    /// Record a node failure, notify, and hand the error back for propagation
    pub(crate) async fn fail_node<T>(&self, node_id: &str, err: FlowError) -> Result<T, FlowError> {
        self.mark_failed(node_id, &err).await;
        Err(err)
    }

    pub(crate) async fn context_snapshot(&self) -> ExecutionContext {
        self.context.read().await.clone()
    }
}
