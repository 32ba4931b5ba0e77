//! Execution planning: compiles a workflow graph once, before the run starts.
//!
//! The plan holds the dependency index, an informational depth per node, and
//! a catalog of gateways with their branches. Parallel gateways additionally
//! get a [`ParallelGroup`] carrying the join mode and concurrency cap.

use bpcore::{Connection, JoinMode, NodeId, NodeKind, NodeSpec, Workflow, WorkflowError};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// The compiled, read-only view of a workflow
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    /// node -> direct upstream nodes
    pub dependencies: HashMap<NodeId, Vec<NodeId>>,
    /// node -> outgoing connections, in declaration order
    pub successors: HashMap<NodeId, Vec<Connection>>,
    /// Longest dependency chain per node; informational only
    pub depth: HashMap<NodeId, usize>,
    pub gateways: Vec<GatewayPlan>,
    pub parallel_groups: Vec<ParallelGroup>,
    /// Parallel gateways with more than one incoming connection
    pub joins: HashSet<NodeId>,
    pub start_node: Option<NodeId>,
}

/// One gateway and the branches leaving it
#[derive(Debug, Clone, Serialize)]
pub struct GatewayPlan {
    pub gateway_id: NodeId,
    pub inputs: Vec<NodeId>,
    pub branches: Vec<Branch>,
}

/// A gateway output port plus the subgraph it owns
#[derive(Debug, Clone, Serialize)]
pub struct Branch {
    pub port: String,
    /// First node of the branch (target of the gateway's connection)
    pub entry: NodeId,
    /// Nodes reachable from the port without passing through a gateway,
    /// excluding nodes already owned by an earlier branch
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParallelGroup {
    pub gateway: GatewayPlan,
    pub join: JoinMode,
    pub max_concurrency: usize,
}

impl ExecutionPlan {
    /// Compile a workflow.
    ///
    /// # Errors
    /// - [`WorkflowError::DuplicateNodeId`] if two nodes share an id.
    /// - [`WorkflowError::NodeNotFound`] if a connection names a missing node.
    /// - [`WorkflowError::InvalidConnection`] if two branches of one gateway
    ///   share a port.
    ///
    /// Cycles are tolerated here; see [`ExecutionPlan::validate_acyclic`].
    pub fn build(workflow: &Workflow) -> Result<Self, WorkflowError> {
        let mut nodes: HashMap<&str, &NodeSpec> = HashMap::new();
        for node in &workflow.nodes {
            if nodes.insert(node.id.as_str(), node).is_some() {
                return Err(WorkflowError::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut dependencies: HashMap<NodeId, Vec<NodeId>> = workflow
            .nodes
            .iter()
            .map(|n| (n.id.clone(), Vec::new()))
            .collect();
        let mut successors: HashMap<NodeId, Vec<Connection>> = dependencies
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        for conn in &workflow.connections {
            for end in [&conn.from_node, &conn.to_node] {
                if !nodes.contains_key(end.as_str()) {
                    return Err(WorkflowError::NodeNotFound(end.clone()));
                }
            }
            if let Some(deps) = dependencies.get_mut(&conn.to_node) {
                if !deps.contains(&conn.from_node) {
                    deps.push(conn.from_node.clone());
                }
            }
            if let Some(out) = successors.get_mut(&conn.from_node) {
                out.push(conn.clone());
            }
        }

        let mut depth = HashMap::with_capacity(workflow.nodes.len());
        for node in &workflow.nodes {
            compute_depth(&node.id, &dependencies, &mut depth);
        }

        let mut gateways = Vec::new();
        let mut parallel_groups = Vec::new();
        let mut joins = HashSet::new();

        for node in &workflow.nodes {
            if !node.is_gateway() {
                continue;
            }
            let plan = build_gateway_plan(node, &nodes, &dependencies, &successors)?;

            if let NodeKind::ParallelGateway(config) = &node.kind {
                let branch_count = plan.branches.len();
                parallel_groups.push(ParallelGroup {
                    gateway: plan.clone(),
                    join: config.join,
                    max_concurrency: config
                        .max_concurrency
                        .filter(|&cap| cap > 0)
                        .unwrap_or(branch_count),
                });
                if plan.inputs.len() > 1 {
                    joins.insert(node.id.clone());
                }
            }
            gateways.push(plan);
        }

        let start_node = workflow
            .nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::Start))
            .map(|n| n.id.clone());

        tracing::debug!(
            "Planned {} nodes, {} gateways, {} join gateways",
            workflow.nodes.len(),
            gateways.len(),
            joins.len()
        );

        Ok(Self {
            dependencies,
            successors,
            depth,
            gateways,
            parallel_groups,
            joins,
            start_node,
        })
    }

    pub fn dependencies_of(&self, node_id: &str) -> &[NodeId] {
        self.dependencies
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn successors_of(&self, node_id: &str) -> &[Connection] {
        self.successors
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn depth_of(&self, node_id: &str) -> Option<usize> {
        self.depth.get(node_id).copied()
    }

    pub fn gateway(&self, gateway_id: &str) -> Option<&GatewayPlan> {
        self.gateways.iter().find(|g| g.gateway_id == gateway_id)
    }

    pub fn parallel_group(&self, gateway_id: &str) -> Option<&ParallelGroup> {
        self.parallel_groups
            .iter()
            .find(|g| g.gateway.gateway_id == gateway_id)
    }

    pub fn is_join(&self, node_id: &str) -> bool {
        self.joins.contains(node_id)
    }

    /// Reject cyclic graphs and return a topological order of the node ids.
    ///
    /// The planner itself never calls this; the engine does when configured
    /// with `reject_cycles`.
    pub fn validate_acyclic(&self) -> Result<Vec<NodeId>, WorkflowError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let mut index = HashMap::new();

        let mut ids: Vec<&NodeId> = self.dependencies.keys().collect();
        ids.sort();
        for id in ids {
            index.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for (target, sources) in &self.dependencies {
            for source in sources {
                if let (Some(&from), Some(&to)) =
                    (index.get(source.as_str()), index.get(target.as_str()))
                {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|_| WorkflowError::CyclicDependency)?;
        Ok(order.into_iter().map(|ix| graph[ix].to_string()).collect())
    }
}

/// Longest dependency chain ending at `node_id`.
///
/// Walks upstream with an explicit stack so long chains cannot exhaust the
/// thread stack. `path` holds the nodes on the current walk; meeting one of
/// them again means a cycle, which contributes 0.
fn compute_depth(
    node_id: &NodeId,
    dependencies: &HashMap<NodeId, Vec<NodeId>>,
    memo: &mut HashMap<NodeId, usize>,
) -> usize {
    if let Some(&d) = memo.get(node_id) {
        return d;
    }

    let mut path: HashSet<&NodeId> = HashSet::from([node_id]);
    // (node, index of the next dependency to visit, deepest chain so far)
    let mut stack: Vec<(&NodeId, usize, usize)> = vec![(node_id, 0, 0)];

    while let Some(&(node, next, deepest)) = stack.last() {
        let deps = dependencies
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match deps.get(next) {
            Some(dep) => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if let Some(&d) = memo.get(dep) {
                    if let Some(top) = stack.last_mut() {
                        top.2 = top.2.max(d + 1);
                    }
                } else if path.insert(dep) {
                    stack.push((dep, 0, 0));
                }
            }
            None => {
                stack.pop();
                path.remove(node);
                memo.insert(node.clone(), deepest);
                if let Some(parent) = stack.last_mut() {
                    parent.2 = parent.2.max(deepest + 1);
                }
            }
        }
    }

    memo.get(node_id).copied().unwrap_or_default()
}

fn build_gateway_plan(
    gateway: &NodeSpec,
    nodes: &HashMap<&str, &NodeSpec>,
    dependencies: &HashMap<NodeId, Vec<NodeId>>,
    successors: &HashMap<NodeId, Vec<Connection>>,
) -> Result<GatewayPlan, WorkflowError> {
    let outgoing = successors
        .get(&gateway.id)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut claimed: HashSet<NodeId> = HashSet::new();
    let mut ports: HashSet<String> = HashSet::new();
    let mut branches = Vec::with_capacity(outgoing.len());

    for (index, conn) in outgoing.iter().enumerate() {
        let port = conn
            .from_port
            .clone()
            .unwrap_or_else(|| format!("out-{}", index));
        if !ports.insert(port.clone()) {
            return Err(WorkflowError::InvalidConnection(format!(
                "gateway {} has more than one branch on port '{}'",
                gateway.id, port
            )));
        }

        let mut owned = Vec::new();
        collect_branch(&conn.to_node, nodes, successors, &mut claimed, &mut owned);
        branches.push(Branch {
            port,
            entry: conn.to_node.clone(),
            nodes: owned,
        });
    }

    Ok(GatewayPlan {
        gateway_id: gateway.id.clone(),
        inputs: dependencies.get(&gateway.id).cloned().unwrap_or_default(),
        branches,
    })
}

/// Depth-first walk that stops at gateways and at nodes already claimed.
fn collect_branch(
    entry: &NodeId,
    nodes: &HashMap<&str, &NodeSpec>,
    successors: &HashMap<NodeId, Vec<Connection>>,
    claimed: &mut HashSet<NodeId>,
    owned: &mut Vec<NodeId>,
) {
    let mut stack = vec![entry];
    while let Some(node_id) = stack.pop() {
        let is_gateway = nodes
            .get(node_id.as_str())
            .is_some_and(|n| n.is_gateway());
        if is_gateway || !claimed.insert(node_id.clone()) {
            continue;
        }
        owned.push(node_id.clone());

        if let Some(out) = successors.get(node_id) {
            stack.extend(out.iter().rev().map(|conn| &conn.to_node));
        }
    }
}
