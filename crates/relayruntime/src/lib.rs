//! Workflow execution runtime
//!
//! This crate provides the execution engine that runs workflows, the
//! capability registry, the expression resolver and output normalizer the
//! engine drives, and the runtime facade that wires them together.

mod context;
mod executor;
pub mod expression;
mod graph;
mod manager;
pub mod normalize;
mod registry;
mod runtime;

pub use context::{build_node_context_entries, OutputStore};
pub use executor::{ExecutionResult, WorkflowExecutor};
pub use expression::{ExpressionError, ExpressionLimits, ExpressionScope};
pub use graph::GraphIndex;
pub use manager::ExecutionManager;
pub use normalize::{normalize_item, normalize_output};
pub use registry::{NodeKind, NodeRegistry, RegisteredNode};
pub use runtime::{ConfigError, EngineConfig, FlowRuntime, RuntimeConfig};
