use relaycore::{Node, NodeDescription, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// How the engine treats a registered capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Seeds a run. Non-executable triggers only forward caller data.
    Trigger { executable: bool },
    Action,
}

/// A capability that passed registration checks
#[derive(Clone)]
pub struct RegisteredNode {
    pub kind: NodeKind,
    pub description: NodeDescription,
    pub node: Arc<dyn Node>,
}

impl RegisteredNode {
    pub fn is_trigger(&self) -> bool {
        matches!(self.kind, NodeKind::Trigger { .. })
    }

    /// Number of output ports, never zero
    pub fn output_count(&self) -> usize {
        self.description.outputs.max(1)
    }
}

/// Registry of available node types
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, RegisteredNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Validate and register a node capability
    pub fn register(&mut self, node: Arc<dyn Node>) -> Result<(), WorkflowError> {
        let registered = validate(node)?;
        let node_type = registered.description.name.clone();

        if self.nodes.contains_key(&node_type) {
            return Err(WorkflowError::InvalidDescription {
                node_type,
                reason: "node type is already registered".to_string(),
            });
        }

        tracing::info!("Registering node type: {}", node_type);
        self.nodes.insert(node_type, registered);
        Ok(())
    }

    pub fn get(&self, node_type: &str) -> Option<&RegisteredNode> {
        self.nodes.get(node_type)
    }

    /// Look up a node type or fail with a graph error
    pub fn require(&self, node_type: &str) -> Result<&RegisteredNode, WorkflowError> {
        self.get(node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.nodes.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get the description of a node type
    pub fn get_description(&self, node_type: &str) -> Option<&NodeDescription> {
        self.nodes.get(node_type).map(|n| &n.description)
    }
}

fn validate(node: Arc<dyn Node>) -> Result<RegisteredNode, WorkflowError> {
    let description = node.description();
    let invalid = |reason: &str| WorkflowError::InvalidDescription {
        node_type: node.node_type().to_string(),
        reason: reason.to_string(),
    };

    if description.name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if description.name != node.node_type() {
        return Err(invalid("description name does not match node type"));
    }
    if description.outputs == 0 {
        return Err(invalid("at least one output port is required"));
    }

    let kind = if description.is_trigger {
        if description.inputs != 0 {
            return Err(invalid("trigger nodes cannot declare input ports"));
        }
        NodeKind::Trigger {
            executable: description.executable,
        }
    } else {
        if !description.executable {
            return Err(invalid("only trigger nodes may be non-executable"));
        }
        NodeKind::Action
    };

    Ok(RegisteredNode {
        kind,
        description,
        node,
    })
}
