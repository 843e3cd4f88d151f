use crate::{
    events::EventEmitter, BinaryDataService, BinaryMetadata, BinaryRef, ExecutionId,
    ExecutionStateUpdate, Item, ItemList, NodeError, NodeId, NodeOutputs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that all node capabilities implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "flow.loop")
    fn node_type(&self) -> &str;

    /// Static description: ports, parameters, trigger flags
    fn description(&self) -> NodeDescription;

    /// Execute the node with given context and return a raw result.
    ///
    /// The engine normalizes whatever JSON comes back into item lists.
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;
}

/// What a capability declares about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub inputs: usize,
    pub outputs: usize,
    #[serde(default)]
    pub properties: Vec<ParameterDefinition>,
    #[serde(default)]
    pub is_trigger: bool,
    /// A non-executable trigger only seeds caller-supplied data
    #[serde(default = "default_true")]
    pub executable: bool,
}

fn default_true() -> bool {
    true
}

impl NodeDescription {
    /// An action with one input and one output port.
    pub fn action(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            category: "general".to_string(),
            inputs: 1,
            outputs: 1,
            properties: Vec::new(),
            is_trigger: false,
            executable: true,
        }
    }

    /// A trigger with no input ports and one output port.
    pub fn trigger(
        name: impl Into<String>,
        display_name: impl Into<String>,
        executable: bool,
    ) -> Self {
        Self {
            inputs: 0,
            is_trigger: true,
            executable,
            category: "trigger".to_string(),
            ..Self::action(name, display_name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn with_property(mut self, property: ParameterDefinition) -> Self {
        self.properties.push(property);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// How a run was started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Trigger,
    Subworkflow,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Manual => write!(f, "manual"),
            ExecutionMode::Trigger => write!(f, "trigger"),
            ExecutionMode::Subworkflow => write!(f, "subworkflow"),
        }
    }
}

/// Callbacks into the running engine
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    /// Run another workflow to completion and return its sink items.
    ///
    /// The child shares the caller's cancellation source.
    async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> Result<ItemList, NodeError>;

    /// Persist execution state, e.g. a `waiting_until` suspension marker.
    async fn update_state(&self, update: ExecutionStateUpdate) -> Result<(), NodeError>;
}

/// Execution context passed to each node invocation
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_type: String,
    pub mode: ExecutionMode,

    /// Input items, indexed by input port
    pub inputs: NodeOutputs,

    /// Parameters with all expressions already resolved
    pub parameters: Value,

    /// Loop lane this invocation belongs to
    pub iteration: Option<usize>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancellation token for the whole run, observe it cooperatively
    pub cancellation: CancellationToken,

    binary: Arc<dyn BinaryDataService>,
    hooks: Arc<dyn ExecutionHooks>,
}

impl NodeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: impl Into<String>,
        mode: ExecutionMode,
        events: EventEmitter,
        cancellation: CancellationToken,
        binary: Arc<dyn BinaryDataService>,
        hooks: Arc<dyn ExecutionHooks>,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            node_type: node_type.into(),
            mode,
            inputs: Vec::new(),
            parameters: Value::Object(Default::default()),
            iteration: None,
            events,
            cancellation,
            binary,
            hooks,
        }
    }

    pub fn with_inputs(mut self, inputs: NodeOutputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_iteration(mut self, iteration: Option<usize>) -> Self {
        self.iteration = iteration;
        self
    }

    /// Items on input port 0
    pub fn items(&self) -> &[Item] {
        self.input_items(0)
    }

    /// Items on a given input port, empty when nothing arrived
    pub fn input_items(&self, port: usize) -> &[Item] {
        self.inputs.get(port).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Items of every input port
    pub fn all_inputs(&self) -> &NodeOutputs {
        &self.inputs
    }

    /// First item on port 0
    pub fn current_item(&self) -> Option<&Item> {
        self.items().first()
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Get parameter with default
    pub fn parameter_or(&self, name: &str, default: Value) -> Value {
        self.parameters.get(name).cloned().unwrap_or(default)
    }

    /// Get required parameter or return error
    pub fn require_parameter(&self, name: &str) -> Result<&Value, NodeError> {
        self.parameters
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing parameter: {}", name)))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_parameter(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidParameter {
            name: name.to_string(),
            expected: "string".to_string(),
            actual: json_type_name(value).to_string(),
        })
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> Result<ItemList, NodeError> {
        self.hooks.execute_workflow(workflow_id, input).await
    }

    pub async fn update_state(&self, update: ExecutionStateUpdate) -> Result<(), NodeError> {
        self.hooks.update_state(update).await
    }

    pub async fn get_binary(&self, handle: &BinaryRef) -> Result<Vec<u8>, NodeError> {
        self.binary
            .retrieve(handle)
            .await
            .map_err(|e| NodeError::Binary(e.to_string()))
    }

    pub async fn set_binary(
        &self,
        data: Vec<u8>,
        metadata: BinaryMetadata,
    ) -> Result<BinaryRef, NodeError> {
        self.binary
            .store(data, metadata)
            .await
            .map_err(|e| NodeError::Binary(e.to_string()))
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
