//! Run-scoped table of node execution states.
//!
//! One store belongs to exactly one run. Entries are created when a node
//! starts running and are only ever updated in place afterwards. Branch
//! bookkeeping of a gateway is mutated under the same write lock as the
//! gateway's state, so concurrent branches never interleave a partial update.

use bpcore::{FlowError, GatewayBranchState, NodeExecutionState, NodeId, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct StateStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    nodes: HashMap<NodeId, NodeExecutionState>,
    released_joins: HashSet<NodeId>,
}

impl StoreInner {
    fn is_satisfied(&self, node_id: &str) -> bool {
        self.released_joins.contains(node_id)
            || self.nodes.get(node_id).is_some_and(|s| s.is_completed())
    }

    fn entry(&mut self, node_id: &str) -> &mut NodeExecutionState {
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeExecutionState::running(node_id))
    }

    fn branches(&mut self, gateway_id: &str) -> &mut GatewayBranchState {
        self.entry(gateway_id)
            .gateway
            .get_or_insert_with(GatewayBranchState::default)
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the running entry for a node.
    ///
    /// Fails if the node already has a state in this run.
    pub async fn begin(
        &self,
        node_id: &str,
        gateway: bool,
    ) -> Result<NodeExecutionState, FlowError> {
        let mut inner = self.inner.write().await;
        if inner.nodes.contains_key(node_id) {
            return Err(FlowError::NodeAlreadyStarted(node_id.to_string()));
        }
        let state = if gateway {
            NodeExecutionState::running_gateway(node_id)
        } else {
            NodeExecutionState::running(node_id)
        };
        inner.nodes.insert(node_id.to_string(), state.clone());
        Ok(state)
    }

    pub async fn complete(&self, node_id: &str, result: Option<Value>) -> NodeExecutionState {
        let mut inner = self.inner.write().await;
        let state = inner.entry(node_id);
        state.complete(result);
        state.clone()
    }

    pub async fn fail(&self, node_id: &str, error: &FlowError) -> NodeExecutionState {
        let mut inner = self.inner.write().await;
        let state = inner.entry(node_id);
        state.fail(error);
        state.clone()
    }

    /// Mark still-running nodes among `node_ids` as failed
    pub async fn fail_running(&self, node_ids: &[NodeId], error: &FlowError) -> Vec<NodeId> {
        let mut inner = self.inner.write().await;
        let mut failed = Vec::new();
        for id in node_ids {
            if let Some(state) = inner.nodes.get_mut(id) {
                if state.status == bpcore::ExecutionStatus::Running {
                    state.fail(error);
                    failed.push(id.clone());
                }
            }
        }
        failed
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeExecutionState> {
        self.inner.read().await.nodes.get(node_id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<NodeId, NodeExecutionState> {
        self.inner.read().await.nodes.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.nodes.is_empty()
    }

    /// Completed node or released join gateway
    pub async fn is_satisfied(&self, node_id: &str) -> bool {
        self.inner.read().await.is_satisfied(node_id)
    }

    /// First dependency that is not satisfied, skipping `exempt`
    pub async fn unmet_dependency(
        &self,
        dependencies: &[NodeId],
        exempt: Option<&str>,
    ) -> Option<NodeId> {
        let inner = self.inner.read().await;
        dependencies
            .iter()
            .filter(|dep| Some(dep.as_str()) != exempt)
            .find(|dep| !inner.is_satisfied(dep))
            .cloned()
    }

    pub async fn hold_branch(&self, gateway_id: &str, port: &str) {
        self.inner.write().await.branches(gateway_id).hold(port);
    }

    pub async fn start_branch(&self, gateway_id: &str, port: &str) {
        self.inner.write().await.branches(gateway_id).start(port);
    }

    pub async fn settle_branch(&self, gateway_id: &str, port: &str, succeeded: bool) {
        self.inner
            .write()
            .await
            .branches(gateway_id)
            .settle(port, succeeded);
    }

    /// Release a join gateway once all its dependencies are satisfied.
    ///
    /// Returns `true` for exactly one caller per join: the one that observed
    /// the last dependency complete.
    pub async fn try_release_join(&self, join_id: &str, dependencies: &[NodeId]) -> bool {
        let mut inner = self.inner.write().await;
        if inner.released_joins.contains(join_id) {
            return false;
        }
        if dependencies.iter().all(|dep| inner.is_satisfied(dep)) {
            inner.released_joins.insert(join_id.to_string());
            true
        } else {
            false
        }
    }

    pub async fn released_joins(&self) -> Vec<NodeId> {
        let mut joins: Vec<NodeId> = self
            .inner
            .read()
            .await
            .released_joins
            .iter()
            .cloned()
            .collect();
        joins.sort();
        joins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpcore::ExecutionStatus;

    #[tokio::test]
    async fn begin_twice_is_rejected() {
        let store = StateStore::new();
        store.begin("a", false).await.expect("first begin");
        assert!(matches!(
            store.begin("a", false).await,
            Err(FlowError::NodeAlreadyStarted(id)) if id == "a"
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn dependencies_are_checked_against_completed_nodes() {
        let store = StateStore::new();
        let deps = vec!["a".to_string(), "b".to_string()];

        store.begin("a", false).await.expect("begin");
        store.complete("a", None).await;
        store.begin("b", false).await.expect("begin");

        assert_eq!(store.unmet_dependency(&deps, None).await.as_deref(), Some("b"));
        assert_eq!(store.unmet_dependency(&deps, Some("b")).await, None);

        store.complete("b", Some(Value::from(1i64))).await;
        assert_eq!(store.unmet_dependency(&deps, None).await, None);
        assert_eq!(
            store.get("b").await.expect("state").result,
            Some(Value::Number(1.0))
        );
    }

    #[tokio::test]
    async fn join_releases_exactly_once() {
        let store = StateStore::new();
        let deps = vec!["x".to_string(), "y".to_string()];

        store.begin("x", false).await.expect("begin");
        store.complete("x", None).await;
        assert!(!store.try_release_join("merge", &deps).await);

        store.begin("y", false).await.expect("begin");
        store.complete("y", None).await;
        assert!(store.try_release_join("merge", &deps).await);
        assert!(!store.try_release_join("merge", &deps).await);

        assert!(store.is_satisfied("merge").await);
        assert!(store.get("merge").await.is_none());
        assert_eq!(store.released_joins().await, vec!["merge"]);
    }

    #[tokio::test]
    async fn branch_bookkeeping_lives_on_the_gateway_state() {
        let store = StateStore::new();
        store.begin("g", true).await.expect("begin");
        store.start_branch("g", "left").await;
        store.start_branch("g", "right").await;
        store.hold_branch("g", "extra").await;
        store.settle_branch("g", "left", true).await;

        let state = store.get("g").await.expect("gateway state");
        let branches = state.gateway.expect("gateway branches");
        assert_eq!(branches.active, vec!["right"]);
        assert_eq!(branches.completed, vec!["left"]);
        assert_eq!(branches.status("extra"), Some(ExecutionStatus::Pending));
    }

    #[tokio::test]
    async fn fail_running_only_touches_running_nodes() {
        let store = StateStore::new();
        store.begin("done", false).await.expect("begin");
        store.complete("done", None).await;
        store.begin("busy", false).await.expect("begin");

        let ids = vec!["done".to_string(), "busy".to_string(), "never".to_string()];
        let failed = store
            .fail_running(&ids, &FlowError::Execution("cancelled".into()))
            .await;

        assert_eq!(failed, vec!["busy"]);
        assert!(store.get("done").await.expect("state").is_completed());
        assert_eq!(
            store.get("busy").await.expect("state").status,
            ExecutionStatus::Failed
        );
    }
}
