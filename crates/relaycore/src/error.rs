use thiserror::Error;

/// Run-level error returned by the engine.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node '{node_id}' failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// True for explicit cancel requests and execution timeouts.
    ///
    /// A node failure whose cause is cooperative cancellation also counts.
    pub fn is_cancellation(&self) -> bool {
        match self {
            FlowError::Cancelled { .. } => true,
            FlowError::Node { source, .. } => matches!(source, NodeError::Cancelled),
            _ => false,
        }
    }

    /// Short machine-readable code, used in logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::Node { .. } => "NODE_ERROR",
            FlowError::Workflow(_) => "WORKFLOW_ERROR",
            FlowError::Cancelled { .. } => "CANCELLED",
            FlowError::ResourceLimit(_) => "RESOURCE_LIMIT",
            FlowError::Storage(_) => "STORAGE_ERROR",
            FlowError::Execution(_) => "EXECUTION_ERROR",
            FlowError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input on port {0}")]
    MissingInput(usize),

    #[error("Invalid parameter '{name}': expected {expected}, got {actual}")]
    InvalidParameter {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Parameter resolution failed: {0}")]
    Parameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Sub-workflow failed: {0}")]
    SubWorkflow(String),

    #[error("Binary data error: {0}")]
    Binary(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Workflow has {} trigger nodes, at most one is allowed: {}", .0.len(), .0.join(", "))]
    MultipleTriggers(Vec<String>),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Invalid node description for '{node_type}': {reason}")]
    InvalidDescription { node_type: String, reason: String },
}

/// Failure reported by a persistence or binary-data collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}
