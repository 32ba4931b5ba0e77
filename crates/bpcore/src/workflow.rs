use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;

/// Complete workflow definition, as produced by the authoring tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect two nodes without naming ports
    pub fn connect(&mut self, from_node: impl Into<NodeId>, to_node: impl Into<NodeId>) {
        self.connections.push(Connection::new(from_node, to_node));
    }

    /// Connect two nodes through a named source port (gateway branch, etc.)
    pub fn connect_port(
        &mut self,
        from_node: impl Into<NodeId>,
        from_port: impl Into<String>,
        to_node: impl Into<NodeId>,
    ) {
        self.connections
            .push(Connection::new(from_node, to_node).with_from_port(from_port));
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            position: None,
        }
    }

    pub fn start(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Start)
    }

    pub fn end(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::End)
    }

    pub fn process(id: impl Into<NodeId>, process_id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Process(ProcessConfig::new(process_id)))
    }

    pub fn parallel(id: impl Into<NodeId>, join: JoinMode) -> Self {
        Self::new(
            id,
            NodeKind::ParallelGateway(ParallelConfig {
                join,
                max_concurrency: None,
            }),
        )
    }

    pub fn exclusive(id: impl Into<NodeId>, condition: Option<&str>) -> Self {
        Self::new(
            id,
            NodeKind::ExclusiveGateway(ExclusiveConfig {
                condition: condition.map(str::to_string),
                default_branch: None,
            }),
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    /// Cap concurrency on a parallel gateway; ignored for other kinds
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        if let NodeKind::ParallelGateway(config) = &mut self.kind {
            config.max_concurrency = Some(max);
        }
        self
    }

    /// Default branch of an exclusive gateway; ignored for other kinds
    pub fn with_default_branch(mut self, port: impl Into<String>) -> Self {
        if let NodeKind::ExclusiveGateway(config) = &mut self.kind {
            config.default_branch = Some(port.into());
        }
        self
    }

    /// Add a process parameter; ignored for other kinds
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let NodeKind::Process(config) = &mut self.kind {
            config.parameters.insert(key.into(), value.into());
        }
        self
    }

    pub fn is_gateway(&self) -> bool {
        self.kind.is_gateway()
    }
}

/// What a node does, with the configuration that kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeKind {
    Start,
    Process(ProcessConfig),
    ParallelGateway(ParallelConfig),
    ExclusiveGateway(ExclusiveConfig),
    End,
}

impl NodeKind {
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            NodeKind::ParallelGateway(_) | NodeKind::ExclusiveGateway(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Process(_) => "process",
            NodeKind::ParallelGateway(_) => "parallel-gateway",
            NodeKind::ExclusiveGateway(_) => "exclusive-gateway",
            NodeKind::End => "end",
        }
    }
}

/// Configuration of a process node.
///
/// `timeout_ms` and `retry_count` are handed to the process callback as-is;
/// the engine does not enforce either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub process_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
}

impl ProcessConfig {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            timeout_ms: None,
            retry_count: 0,
            parameters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default)]
    pub join: JoinMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusiveConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

/// When a parallel gateway's branches count as collectively settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMode {
    /// Every started branch must succeed
    #[default]
    All,
    /// The first branch to settle decides
    First,
    /// The first success decides; fails only if every branch fails
    Any,
}

impl std::fmt::Display for JoinMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinMode::All => write!(f, "all"),
            JoinMode::First => write!(f, "first"),
            JoinMode::Any => write!(f, "any"),
        }
    }
}

/// Connection between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<String>,
    pub to_node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<String>,
}

impl Connection {
    pub fn new(from_node: impl Into<NodeId>, to_node: impl Into<NodeId>) -> Self {
        Self {
            from_node: from_node.into(),
            from_port: None,
            to_node: to_node.into(),
            to_port: None,
        }
    }

    pub fn with_from_port(mut self, port: impl Into<String>) -> Self {
        self.from_port = Some(port.into());
        self
    }

    pub fn with_to_port(mut self, port: impl Into<String>) -> Self {
        self.to_port = Some(port.into());
        self
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
