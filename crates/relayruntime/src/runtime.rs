use crate::expression::ExpressionLimits;
use crate::{registry::NodeRegistry, ExecutionManager, ExecutionResult, WorkflowExecutor};
use relaycore::{
    EventBus, ExecutionEvent, FlowError, MemoryBinaryStore, MemoryStore, Workflow, WorkflowError,
    WorkflowId, WorkflowStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    executor: WorkflowExecutor,
    event_bus: Arc<EventBus>,
    store: MemoryStore,
    binary: MemoryBinaryStore,
    manager: ExecutionManager,
}

impl FlowRuntime {
    /// Create a runtime over a populated registry with default settings
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    /// Create a runtime with custom configuration
    pub fn with_config(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let store = MemoryStore::new();
        let binary = MemoryBinaryStore::new();
        let manager = ExecutionManager::new();

        let executor = WorkflowExecutor::new(
            registry.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
        .with_binary_store(Arc::new(binary.clone()))
        .with_event_bus(event_bus.clone())
        .with_manager(manager.clone())
        .with_config(config.engine);

        Self {
            registry,
            executor,
            event_bus,
            store,
            binary,
            manager,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Backing store for executions, steps and registered workflows
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn binary_store(&self) -> &MemoryBinaryStore {
        &self.binary
    }

    /// Register a workflow so it can be run by id or used as a sub-workflow
    pub async fn register_workflow(&self, workflow: Workflow) -> WorkflowId {
        let id = workflow.id.clone();
        tracing::info!("Registering workflow {} ({})", workflow.name, id);
        self.store.save_workflow(workflow).await;
        id
    }

    /// Execute a registered workflow by id
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> Result<ExecutionResult, FlowError> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await
            .map_err(|_| WorkflowError::NotFound(workflow_id.to_string()))?;

        self.execute(&workflow, input).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &Workflow,
        input: Value,
    ) -> Result<ExecutionResult, FlowError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        self.executor.run(&execution_id, workflow, input, None).await
    }

    /// Execute with a caller-chosen id and cancellation signal
    pub async fn execute_with(
        &self,
        execution_id: &str,
        workflow: &Workflow,
        input: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionResult, FlowError> {
        self.executor.run(execution_id, workflow, input, cancel).await
    }

    /// Request cancellation of a running execution
    pub async fn cancel(&self, execution_id: &str) -> bool {
        self.manager.cancel(execution_id).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            event_buffer_size: 1000,
        }
    }
}

/// Limits and knobs of the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dispatches of a single node id before the run is aborted
    pub max_node_visits: usize,
    pub expression_timeout_ms: u64,
    pub expression_loop_limit: u64,
    pub expression_recursion_limit: usize,
    /// How long an in-flight node may keep running after cancellation
    pub cancel_grace_ms: u64,
    /// Node type whose port-0 output is split into loop lanes
    pub loop_node_type: String,
}

impl EngineConfig {
    pub fn expression_limits(&self) -> ExpressionLimits {
        ExpressionLimits {
            timeout: Duration::from_millis(self.expression_timeout_ms),
            loop_iteration_limit: self.expression_loop_limit,
            recursion_limit: self.expression_recursion_limit,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_visits: 100,
            expression_timeout_ms: 100,
            expression_loop_limit: 100_000,
            expression_recursion_limit: 256,
            cancel_grace_ms: 500,
            loop_node_type: "flow.loop".to_string(),
        }
    }
}
