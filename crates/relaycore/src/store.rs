//! Persistence collaborators.
//!
//! The [`ExecutionStore`] trait covers execution rows and their step history;
//! [`WorkflowStore`] resolves sub-workflow targets. [`MemoryStore`] implements
//! both in process.

use crate::{ExecutionId, ExecutionMode, NodeId, StoreError, Workflow, WorkflowId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
    Canceled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Status of a single step (one node attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Error,
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub node_count: u64,
    pub retry_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow: Workflow,
    pub mode: ExecutionMode,
    pub parent_execution_id: Option<ExecutionId>,
    pub status: ExecutionStatus,
    pub current_node_id: Option<NodeId>,
    pub iteration_index: Option<usize>,
    pub waiting_until: Option<DateTime<Utc>>,
    pub metrics: ExecutionMetrics,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One attempt of one node. Never rewritten once finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub iteration_index: Option<usize>,
    pub attempt: u32,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Partial update of an execution's recovery cursor.
///
/// `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStateUpdate {
    pub current_node_id: Option<Option<NodeId>>,
    pub iteration_index: Option<Option<usize>>,
    pub waiting_until: Option<Option<DateTime<Utc>>>,
}

impl ExecutionStateUpdate {
    pub fn cursor(node_id: &str, iteration: Option<usize>) -> Self {
        Self {
            current_node_id: Some(Some(node_id.to_string())),
            iteration_index: Some(iteration),
            waiting_until: None,
        }
    }

    pub fn waiting_until(until: Option<DateTime<Utc>>) -> Self {
        Self {
            waiting_until: Some(until),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl StepUpdate {
    pub fn success(output: Value) -> Self {
        Self {
            status: StepStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Storage trait for executions and their steps.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        metrics: Option<&ExecutionMetrics>,
    ) -> Result<(), StoreError>;

    async fn update_execution_state(
        &self,
        execution_id: &str,
        update: ExecutionStateUpdate,
    ) -> Result<(), StoreError>;

    async fn create_execution_step(&self, step: &ExecutionStep) -> Result<(), StoreError>;

    async fn update_execution_step(
        &self,
        step_id: &str,
        update: StepUpdate,
    ) -> Result<(), StoreError>;

    /// Executions still marked running, for crash recovery.
    async fn list_active_executions(&self) -> Result<Vec<Execution>, StoreError>;
}

/// Workflow lookup for sub-workflow invocation.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    workflows: HashMap<WorkflowId, Workflow>,
    executions: HashMap<ExecutionId, Execution>,
    steps: Vec<ExecutionStep>,
}

/// In-memory store for the CLI and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save_workflow(&self, workflow: Workflow) {
        self.state
            .write()
            .await
            .workflows
            .insert(workflow.id.clone(), workflow);
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.state.read().await.workflows.values().cloned().collect()
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<Execution> {
        self.state.read().await.executions.get(execution_id).cloned()
    }

    /// All executions, oldest first
    pub async fn list_executions(&self) -> Vec<Execution> {
        let mut executions: Vec<Execution> =
            self.state.read().await.executions.values().cloned().collect();
        executions.sort_by_key(|e| e.started_at);
        executions
    }

    /// Steps of one execution in insertion order
    pub async fn list_steps(&self, execution_id: &str) -> Vec<ExecutionStep> {
        self.state
            .read()
            .await
            .steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect()
    }

    /// Steps of one node in one execution, ordered by attempt
    pub async fn node_steps(&self, execution_id: &str, node_id: &str) -> Vec<ExecutionStep> {
        self.list_steps(execution_id)
            .await
            .into_iter()
            .filter(|s| s.node_id == node_id)
            .collect()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        metrics: Option<&ExecutionMetrics>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let execution = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution_id)))?;

        execution.status = status;
        if let Some(metrics) = metrics {
            execution.metrics = *metrics;
        }
        if status != ExecutionStatus::Running {
            execution.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_execution_state(
        &self,
        execution_id: &str,
        update: ExecutionStateUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let execution = state
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution_id)))?;

        if let Some(node_id) = update.current_node_id {
            execution.current_node_id = node_id;
        }
        if let Some(index) = update.iteration_index {
            execution.iteration_index = index;
        }
        if let Some(until) = update.waiting_until {
            execution.waiting_until = until;
        }
        Ok(())
    }

    async fn create_execution_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
        self.state.write().await.steps.push(step.clone());
        Ok(())
    }

    async fn update_execution_step(
        &self,
        step_id: &str,
        update: StepUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let step = state
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StoreError::NotFound(format!("step {}", step_id)))?;

        step.status = update.status;
        step.output = update.output;
        step.error = update.error;
        step.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn list_active_executions(&self) -> Result<Vec<Execution>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError> {
        self.state
            .read()
            .await
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))
    }
}
