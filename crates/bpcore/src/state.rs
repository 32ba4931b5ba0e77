//! Per-run execution records: node and gateway states, and the run context.

use crate::{FlowError, NodeId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle status shared by nodes, branches and whole runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State of one node within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionState {
    pub node_id: NodeId,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Present for gateway nodes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayBranchState>,
}

impl NodeExecutionState {
    /// A node that has just started running
    pub fn running(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            status: ExecutionStatus::Running,
            start_time: Some(Utc::now()),
            end_time: None,
            result: None,
            error: None,
            gateway: None,
        }
    }

    /// A gateway that has just started running, with empty branch tracking
    pub fn running_gateway(node_id: impl Into<NodeId>) -> Self {
        Self {
            gateway: Some(GatewayBranchState::default()),
            ..Self::running(node_id)
        }
    }

    pub fn complete(&mut self, result: Option<Value>) {
        self.status = ExecutionStatus::Completed;
        self.end_time = Some(Utc::now());
        self.result = result;
    }

    pub fn fail(&mut self, error: &FlowError) {
        self.status = ExecutionStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.to_string());
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Branch bookkeeping a gateway carries on top of its node state.
///
/// `active`, `completed` and `failed` are disjoint at all times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayBranchState {
    pub branch_states: HashMap<String, ExecutionStatus>,
    pub active: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

impl GatewayBranchState {
    /// Branch known to the gateway but not started
    pub fn hold(&mut self, port: &str) {
        self.branch_states
            .insert(port.to_string(), ExecutionStatus::Pending);
    }

    pub fn start(&mut self, port: &str) {
        self.remove(port);
        self.active.push(port.to_string());
        self.branch_states
            .insert(port.to_string(), ExecutionStatus::Running);
    }

    pub fn settle(&mut self, port: &str, succeeded: bool) {
        self.remove(port);
        let (list, status) = if succeeded {
            (&mut self.completed, ExecutionStatus::Completed)
        } else {
            (&mut self.failed, ExecutionStatus::Failed)
        };
        list.push(port.to_string());
        self.branch_states.insert(port.to_string(), status);
    }

    pub fn status(&self, port: &str) -> Option<ExecutionStatus> {
        self.branch_states.get(port).copied()
    }

    fn remove(&mut self, port: &str) {
        self.active.retain(|p| p != port);
        self.completed.retain(|p| p != port);
        self.failed.retain(|p| p != port);
    }
}

/// Identity, variables and overall status of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
}

impl ExecutionContext {
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            execution_id: Uuid::new_v4(),
            user_id: None,
            tenant_id: None,
            variables: HashMap::new(),
            start_time: Utc::now(),
            status: ExecutionStatus::Pending,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_lists_stay_disjoint() {
        let mut branches = GatewayBranchState::default();
        branches.hold("late");
        branches.start("a");
        branches.start("b");
        branches.settle("a", true);
        branches.settle("b", false);

        assert!(branches.active.is_empty());
        assert_eq!(branches.completed, vec!["a"]);
        assert_eq!(branches.failed, vec!["b"]);
        assert_eq!(branches.status("late"), Some(ExecutionStatus::Pending));
        assert_eq!(branches.status("a"), Some(ExecutionStatus::Completed));
        assert_eq!(branches.status("b"), Some(ExecutionStatus::Failed));
    }

    #[test]
    fn node_state_records_outcome() {
        let mut state = NodeExecutionState::running("p1");
        assert_eq!(state.status, ExecutionStatus::Running);
        assert!(state.start_time.is_some());

        state.fail(&FlowError::Execution("boom".into()));
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("Execution error: boom"));
        assert!(state.duration_ms().is_some());
    }
}
