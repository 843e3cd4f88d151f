//! Core abstractions for the relay workflow runtime
//!
//! This crate provides the data model and the contracts the engine talks
//! through: items, workflow definitions, the node capability trait and its
//! execution context, the event bus, and the persistence / binary-data
//! collaborators. It has no engine logic.

pub mod binary;
mod error;
pub mod events;
mod item;
mod node;
pub mod store;
mod workflow;

pub use binary::{BinaryDataService, BinaryMetadata, BinaryRef, MemoryBinaryStore};
pub use error::{FlowError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use item::{Item, ItemList, NodeOutputs};
pub use node::{
    ExecutionHooks, ExecutionMode, Node, NodeContext, NodeDescription, ParameterDefinition,
};
pub use store::{
    Execution, ExecutionMetrics, ExecutionStateUpdate, ExecutionStatus, ExecutionStep,
    ExecutionStore, MemoryStore, StepStatus, StepUpdate, WorkflowStore,
};
pub use workflow::{
    Connection, ConnectionTarget, NodeId, NodeSpec, Workflow, WorkflowId, WorkflowSettings,
};

/// Identifier of one workflow run
pub type ExecutionId = String;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
