//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod binary;
mod debug;
mod flow;
mod http;
mod time;
mod transform;
mod trigger;

pub use binary::{BinaryFromTextNode, BinaryToTextNode};
pub use debug::DebugNode;
pub use flow::{ExecuteWorkflowNode, IfNode, LoopNode, MergeNode};
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode, SetNode};
pub use trigger::{ManualTriggerNode, StartNode};

use relaycore::{Item, ItemList, NodeError, WorkflowError};
use relayruntime::NodeRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) -> Result<(), WorkflowError> {
    registry.register(Arc::new(ManualTriggerNode))?;
    registry.register(Arc::new(StartNode))?;
    registry.register(Arc::new(LoopNode))?;
    registry.register(Arc::new(IfNode))?;
    registry.register(Arc::new(MergeNode))?;
    registry.register(Arc::new(ExecuteWorkflowNode))?;
    registry.register(Arc::new(SetNode))?;
    registry.register(Arc::new(JsonParseNode))?;
    registry.register(Arc::new(JsonStringifyNode))?;
    registry.register(Arc::new(DelayNode))?;
    registry.register(Arc::new(DebugNode))?;
    registry.register(Arc::new(HttpRequestNode::new()))?;
    registry.register(Arc::new(BinaryFromTextNode))?;
    registry.register(Arc::new(BinaryToTextNode))?;
    Ok(())
}

/// A registry pre-populated with every standard node
pub fn standard_registry() -> Result<NodeRegistry, WorkflowError> {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry)?;
    Ok(registry)
}

/// Items on a single output port
pub(crate) fn items_output(items: &[Item]) -> Result<Value, NodeError> {
    serde_json::to_value(items).map_err(|e| NodeError::ExecutionFailed(e.to_string()))
}

/// One item list per output port
pub(crate) fn ports_output(ports: &[ItemList]) -> Result<Value, NodeError> {
    ports
        .iter()
        .map(|items| items_output(items))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}
