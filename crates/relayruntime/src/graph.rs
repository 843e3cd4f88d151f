use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use relaycore::{ConnectionTarget, NodeId, Workflow, WorkflowError};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Readiness data computed once per run from the workflow's connections
#[derive(Debug, Clone)]
pub struct GraphIndex {
    sinks: Vec<NodeId>,
    entries: Vec<NodeId>,
    expected_ports: HashMap<NodeId, BTreeSet<usize>>,
    outgoing: HashMap<(NodeId, usize), Vec<ConnectionTarget>>,
}

impl GraphIndex {
    /// Build the index, rejecting duplicate ids and dangling connections
    pub fn build(workflow: &Workflow) -> Result<Self, WorkflowError> {
        let mut graph: DiGraph<NodeId, usize> = DiGraph::new();
        let mut node_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        for node_spec in &workflow.nodes {
            if node_to_index.contains_key(node_spec.id.as_str()) {
                return Err(WorkflowError::DuplicateNode(node_spec.id.clone()));
            }
            let idx = graph.add_node(node_spec.id.clone());
            node_to_index.insert(node_spec.id.as_str(), idx);
        }

        let mut expected_ports: HashMap<NodeId, BTreeSet<usize>> = HashMap::new();
        let mut outgoing: HashMap<(NodeId, usize), Vec<ConnectionTarget>> = HashMap::new();

        for conn in &workflow.connections {
            let from_idx = node_to_index
                .get(conn.source_node.as_str())
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.source_node.clone()))?;

            for target in &conn.targets {
                let to_idx = node_to_index.get(target.node.as_str()).ok_or_else(|| {
                    WorkflowError::InvalidConnection(format!(
                        "{}:{} -> unknown node '{}'",
                        conn.source_node, conn.source_port, target.node
                    ))
                })?;

                graph.add_edge(*from_idx, *to_idx, target.port);
                expected_ports
                    .entry(target.node.clone())
                    .or_default()
                    .insert(target.port);
            }

            outgoing
                .entry((conn.source_node.clone(), conn.source_port))
                .or_default()
                .extend(conn.targets.iter().cloned());
        }

        let sink_set: HashSet<NodeIndex> = graph.externals(Direction::Outgoing).collect();
        let entry_set: HashSet<NodeIndex> = graph.externals(Direction::Incoming).collect();

        // Keep workflow order so results and seeding are deterministic
        let ordered = |set: &HashSet<NodeIndex>| -> Vec<NodeId> {
            workflow
                .nodes
                .iter()
                .filter(|n| {
                    node_to_index
                        .get(n.id.as_str())
                        .map(|idx| set.contains(idx))
                        .unwrap_or(false)
                })
                .map(|n| n.id.clone())
                .collect()
        };

        Ok(Self {
            sinks: ordered(&sink_set),
            entries: ordered(&entry_set),
            expected_ports,
            outgoing,
        })
    }

    /// Nodes with no outgoing connection
    pub fn sinks(&self) -> &[NodeId] {
        &self.sinks
    }

    /// Nodes with no incoming connection
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    /// Input ports a node waits on before it is ready; `{0}` by default
    pub fn expected_ports(&self, node_id: &str) -> BTreeSet<usize> {
        self.expected_ports
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([0]))
    }

    /// Targets of one output port, in declared order
    pub fn targets(&self, node_id: &str, port: usize) -> &[ConnectionTarget] {
        self.outgoing
            .get(&(node_id.to_string(), port))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
