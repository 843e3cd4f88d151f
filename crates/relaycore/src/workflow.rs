use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect `from_node`'s output port to `to_node`'s input port.
    ///
    /// Targets of the same output port keep the order they were added in.
    pub fn connect(
        &mut self,
        from_node: impl Into<String>,
        from_port: usize,
        to_node: impl Into<String>,
        to_port: usize,
    ) {
        let from_node = from_node.into();
        let target = ConnectionTarget {
            node: to_node.into(),
            port: to_port,
        };

        match self
            .connections
            .iter_mut()
            .find(|c| c.source_node == from_node && c.source_port == from_port)
        {
            Some(existing) => existing.targets.push(target),
            None => self.connections.push(Connection {
                source_node: from_node,
                source_port: from_port,
                targets: vec![target],
            }),
        }
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node definition inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub node_type: String,
    /// Human label, used as the `$node` key when present
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    /// Output override that replaces the capability's result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_data: Option<Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            parameters: Value::Object(Default::default()),
            pinned_data: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.parameters.is_object() {
            self.parameters = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.parameters {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_pinned_data(mut self, data: Value) -> Self {
        self.pinned_data = Some(data);
        self
    }

    /// Attach a `retryConfig` parameter.
    pub fn with_retry(self, max_retries: u32, backoff_ms: u64, on_error: &str) -> Self {
        self.with_parameter(
            "retryConfig",
            serde_json::json!({
                "maxRetries": max_retries,
                "backoffMs": backoff_ms,
                "onError": on_error,
            }),
        )
    }

    /// Label used for `$node` lookups
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// All targets fed by one output port of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub source_node: NodeId,
    #[serde(default)]
    pub source_port: usize,
    pub targets: Vec<ConnectionTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: NodeId,
    #[serde(default)]
    pub port: usize,
}

/// Global workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_max_nodes")]
    pub max_nodes_per_execution: usize,
    /// Wall-clock budget for a whole run; `None` or 0 means unlimited
    #[serde(default)]
    pub execution_timeout_ms: Option<u64>,
}

fn default_max_nodes() -> usize {
    1000
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_nodes_per_execution: default_max_nodes(),
            execution_timeout_ms: None,
        }
    }
}
