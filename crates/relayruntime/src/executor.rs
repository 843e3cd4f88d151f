use crate::context::{build_node_context_entries, loop_item_value, OutputStore, RunHooks};
use crate::expression::{resolve_parameters_async, ExpressionScope};
use crate::graph::GraphIndex;
use crate::normalize::{normalize_output, outputs_to_value};
use crate::registry::{NodeKind, NodeRegistry, RegisteredNode};
use crate::{EngineConfig, ExecutionManager};
use chrono::Utc;
use relaycore::{
    BinaryDataService, EventBus, Execution, ExecutionEvent, ExecutionHooks, ExecutionId,
    ExecutionMetrics, ExecutionMode, ExecutionStateUpdate, ExecutionStatus, ExecutionStep,
    ExecutionStore, FlowError, Item, ItemList, MemoryBinaryStore, NodeContext, NodeError, NodeId,
    NodeOutputs, NodeSpec, StepStatus, StepUpdate, Workflow, WorkflowError, WorkflowStore,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to do once a node has used up its retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OnError {
    #[default]
    Stop,
    Continue,
}

/// Per-node `retryConfig` parameter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RetryConfig {
    max_retries: u32,
    backoff_ms: u64,
    on_error: OnError,
}

/// Items delivered to one input port of one node
#[derive(Debug)]
struct Token {
    node_id: NodeId,
    port: usize,
    items: ItemList,
    iteration: Option<usize>,
}

/// Mutable state of one run, owned by the dispatch loop
struct RunState<'a> {
    execution_id: ExecutionId,
    mode: ExecutionMode,
    workflow: &'a Workflow,
    cancellation: CancellationToken,
    timed_out: Arc<AtomicBool>,
    hooks: Arc<dyn ExecutionHooks>,
    queue: VecDeque<Token>,
    pending: HashMap<(NodeId, Option<usize>), BTreeMap<usize, ItemList>>,
    visits: HashMap<NodeId, usize>,
    dispatched: usize,
    metrics: ExecutionMetrics,
    outputs: OutputStore,
}

/// Runs workflows: trigger phase, then a FIFO dispatch loop over tokens
#[derive(Clone)]
pub struct WorkflowExecutor {
    registry: Arc<NodeRegistry>,
    executions: Arc<dyn ExecutionStore>,
    workflows: Arc<dyn WorkflowStore>,
    binary: Arc<dyn BinaryDataService>,
    events: Arc<EventBus>,
    manager: ExecutionManager,
    config: Arc<EngineConfig>,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        executions: Arc<dyn ExecutionStore>,
        workflows: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self {
            registry,
            executions,
            workflows,
            binary: Arc::new(MemoryBinaryStore::new()),
            events: Arc::new(EventBus::default()),
            manager: ExecutionManager::new(),
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_binary_store(mut self, binary: Arc<dyn BinaryDataService>) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_manager(mut self, manager: ExecutionManager) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn manager(&self) -> &ExecutionManager {
        &self.manager
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn workflow_store(&self) -> &Arc<dyn WorkflowStore> {
        &self.workflows
    }

    pub(crate) fn execution_store(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    /// Run a workflow to completion in manual mode.
    ///
    /// `cancel` becomes the parent of the run's own cancellation source.
    pub async fn run(
        &self,
        execution_id: &str,
        workflow: &Workflow,
        initial_data: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionResult, FlowError> {
        self.run_with_mode(
            execution_id,
            workflow,
            initial_data,
            cancel,
            ExecutionMode::Manual,
            None,
        )
        .await
    }

    pub async fn run_with_mode(
        &self,
        execution_id: &str,
        workflow: &Workflow,
        initial_data: Value,
        cancel: Option<CancellationToken>,
        mode: ExecutionMode,
        parent_execution_id: Option<ExecutionId>,
    ) -> Result<ExecutionResult, FlowError> {
        let start_time = Instant::now();
        let cancellation = match cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        self.executions
            .create_execution(&Execution {
                id: execution_id.to_string(),
                workflow_id: workflow.id.clone(),
                workflow: workflow.clone(),
                mode,
                parent_execution_id,
                status: ExecutionStatus::Running,
                current_node_id: None,
                iteration_index: None,
                waiting_until: None,
                metrics: ExecutionMetrics::default(),
                started_at: Utc::now(),
                finished_at: None,
            })
            .await?;
        self.manager.register(execution_id, cancellation.clone()).await;

        tracing::info!(
            "Starting workflow execution {} of {} ({} mode)",
            execution_id,
            workflow.id,
            mode
        );

        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = spawn_timer(workflow, &cancellation, &timed_out);

        let hooks: Arc<dyn ExecutionHooks> = Arc::new(RunHooks {
            executor: self.clone(),
            execution_id: execution_id.to_string(),
            cancellation: cancellation.clone(),
        });

        let mut run = RunState {
            execution_id: execution_id.to_string(),
            mode,
            workflow,
            cancellation,
            timed_out,
            hooks,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            visits: HashMap::new(),
            dispatched: 0,
            metrics: ExecutionMetrics::default(),
            outputs: OutputStore::new(),
        };

        let outcome = self.drive(&mut run, initial_data).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        self.manager.unregister(execution_id).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(outputs) => {
                self.executions
                    .update_execution_status(
                        execution_id,
                        ExecutionStatus::Success,
                        Some(&run.metrics),
                    )
                    .await?;
                self.events.emit(ExecutionEvent::ExecutionFinish {
                    execution_id: execution_id.to_string(),
                    status: ExecutionStatus::Success,
                    error: None,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                tracing::info!("Execution {} succeeded in {}ms", execution_id, duration_ms);

                Ok(ExecutionResult {
                    execution_id: execution_id.to_string(),
                    status: ExecutionStatus::Success,
                    outputs,
                    metrics: run.metrics,
                    duration_ms,
                })
            }
            Err(err) => {
                let status = if err.is_cancellation() {
                    ExecutionStatus::Canceled
                } else {
                    run.metrics.error_count += 1;
                    ExecutionStatus::Error
                };

                if let Err(store_err) = self
                    .executions
                    .update_execution_status(execution_id, status, Some(&run.metrics))
                    .await
                {
                    tracing::warn!(
                        "Failed to persist final status of execution {}: {}",
                        execution_id,
                        store_err
                    );
                }
                self.events.emit(ExecutionEvent::ExecutionFinish {
                    execution_id: execution_id.to_string(),
                    status,
                    error: Some(err.to_string()),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                tracing::error!("Execution {} finished with {}: {}", execution_id, status, err);

                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        run: &mut RunState<'_>,
        initial_data: Value,
    ) -> Result<BTreeMap<NodeId, NodeOutputs>, FlowError> {
        let workflow = run.workflow;
        let graph = GraphIndex::build(workflow)?;

        let mut triggers = Vec::new();
        for spec in &workflow.nodes {
            if self.registry.require(&spec.node_type)?.is_trigger() {
                triggers.push(spec);
            }
        }
        if triggers.len() > 1 {
            return Err(WorkflowError::MultipleTriggers(
                triggers.iter().map(|t| t.id.clone()).collect(),
            )
            .into());
        }

        self.check_cancelled(run)?;

        match triggers.first() {
            Some(trigger) => self.run_trigger(run, &graph, trigger, initial_data).await?,
            None => {
                let seed = first_port(normalize_output(initial_data, 1));
                for entry in graph.entries() {
                    tracing::debug!("Seeding entry node {}", entry);
                    run.queue.push_back(Token {
                        node_id: entry.clone(),
                        port: 0,
                        items: seed.clone(),
                        iteration: None,
                    });
                }
            }
        }

        while let Some(token) = run.queue.pop_front() {
            self.dispatch(run, &graph, token).await?;
        }
        self.check_cancelled(run)?;

        Ok(graph
            .sinks()
            .iter()
            .filter_map(|id| run.outputs.merged(id).map(|outputs| (id.clone(), outputs)))
            .collect())
    }

    /// Run the single trigger once, outside the retry machinery
    async fn run_trigger(
        &self,
        run: &mut RunState<'_>,
        graph: &GraphIndex,
        spec: &NodeSpec,
        initial_data: Value,
    ) -> Result<(), FlowError> {
        let registered = self.registry.require(&spec.node_type)?;
        let inputs = vec![first_port(normalize_output(initial_data.clone(), 1))];

        run.metrics.node_count += 1;
        let step_id = self
            .start_step(run, &spec.id, None, 1, initial_data.clone())
            .await?;
        self.emit_before(run, spec, 1);
        let started = Instant::now();

        let raw = match (&spec.pinned_data, registered.kind) {
            (Some(pinned), _) => Ok(pinned.clone()),
            (None, NodeKind::Trigger { executable: false }) => Ok(initial_data),
            _ => self.invoke(run, spec, registered, inputs, None, &mut None).await,
        };
        // A result that lands after cancellation does not count as success
        let raw = match raw {
            Ok(_) if run.cancellation.is_cancelled() => Err(NodeError::Cancelled),
            other => other,
        };

        match raw {
            Ok(raw) => {
                let outputs = normalize_output(raw, registered.output_count());
                self.complete_step(run, spec, &step_id, &outputs, started).await?;
                run.metrics.success_count += 1;
                run.outputs.record(&spec.id, None, outputs.clone());
                self.fan_out(run, graph, spec, &outputs, None);
                Ok(())
            }
            Err(err) => {
                self.fail_step(run, spec, &step_id, &err.to_string()).await?;
                if is_cancellation(&err, run) {
                    return Err(self.cancelled(run));
                }
                Err(FlowError::Node {
                    node_id: spec.id.clone(),
                    source: err,
                })
            }
        }
    }

    async fn dispatch(
        &self,
        run: &mut RunState<'_>,
        graph: &GraphIndex,
        token: Token,
    ) -> Result<(), FlowError> {
        self.check_cancelled(run)?;
        self.executions
            .update_execution_state(
                &run.execution_id,
                ExecutionStateUpdate::cursor(&token.node_id, token.iteration),
            )
            .await?;

        let visits = run.visits.entry(token.node_id.clone()).or_insert(0);
        *visits += 1;
        if *visits > self.config.max_node_visits {
            return Err(FlowError::ResourceLimit(format!(
                "node '{}' was dispatched more than {} times",
                token.node_id, self.config.max_node_visits
            )));
        }
        let max_nodes = run.workflow.settings.max_nodes_per_execution;
        if run.dispatched >= max_nodes {
            return Err(FlowError::ResourceLimit(format!(
                "execution dispatched more than {} nodes",
                max_nodes
            )));
        }
        run.dispatched += 1;

        let Token {
            node_id,
            port,
            items,
            iteration,
        } = token;

        let expected = graph.expected_ports(&node_id);
        let key = (node_id.clone(), iteration);
        let arrived = run.pending.entry(key.clone()).or_default();
        arrived.insert(port, items);
        if !expected.iter().all(|p| arrived.contains_key(p)) {
            tracing::debug!(
                "Node {} waiting for ports {:?}, has {:?}",
                node_id,
                expected,
                arrived.keys().collect::<Vec<_>>()
            );
            return Ok(());
        }

        let mut arrived = run.pending.remove(&key).unwrap_or_default();
        let port_count = expected.iter().next_back().map(|p| p + 1).unwrap_or(1);
        let inputs: NodeOutputs = (0..port_count)
            .map(|p| arrived.remove(&p).unwrap_or_default())
            .collect();

        let workflow = run.workflow;
        let spec = workflow
            .find_node(&node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;
        let registered = self.registry.require(&spec.node_type)?;
        let input_snapshot = outputs_to_value(&inputs);

        let dead_path = expected.len() == 1 && expected.iter().all(|p| inputs[*p].is_empty());

        let outputs = if dead_path {
            tracing::debug!("Node {} received no items, passing empty outputs", node_id);
            let outputs = vec![Vec::new(); registered.output_count()];
            self.record_passthrough(run, spec, iteration, input_snapshot, &outputs)
                .await?;
            outputs
        } else if let Some(pinned) = &spec.pinned_data {
            tracing::debug!("Node {} uses pinned data", node_id);
            let outputs = normalize_output(pinned.clone(), registered.output_count());
            self.record_passthrough(run, spec, iteration, input_snapshot, &outputs)
                .await?;
            run.metrics.success_count += 1;
            outputs
        } else {
            self.execute_with_retry(run, spec, registered, inputs, iteration, input_snapshot)
                .await?
        };

        run.outputs.record(&spec.id, iteration, outputs.clone());
        self.fan_out(run, graph, spec, &outputs, iteration);
        Ok(())
    }

    async fn execute_with_retry(
        &self,
        run: &mut RunState<'_>,
        spec: &NodeSpec,
        registered: &RegisteredNode,
        inputs: NodeOutputs,
        iteration: Option<usize>,
        input_snapshot: Value,
    ) -> Result<NodeOutputs, FlowError> {
        let retry = self.retry_config(run, spec, &inputs, iteration).await;
        let max_attempts = retry.max_retries.saturating_add(1);
        let mut resolved: Option<Value> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            run.metrics.node_count += 1;
            if attempt > 1 {
                run.metrics.retry_count += 1;
            }

            let step_id = self
                .start_step(run, &spec.id, iteration, attempt, input_snapshot.clone())
                .await?;
            self.emit_before(run, spec, attempt);
            let started = Instant::now();

            let err = match self
                .invoke(run, spec, registered, inputs.clone(), iteration, &mut resolved)
                .await
            {
                Ok(_) if run.cancellation.is_cancelled() => NodeError::Cancelled,
                Ok(raw) => {
                    let outputs = normalize_output(raw, registered.output_count());
                    self.complete_step(run, spec, &step_id, &outputs, started).await?;
                    run.metrics.success_count += 1;
                    tracing::info!(
                        "Node {} completed in {}ms",
                        spec.id,
                        started.elapsed().as_millis()
                    );
                    return Ok(outputs);
                }
                Err(err) => err,
            };

            let message = format!("Attempt {}/{}: {}", attempt, max_attempts, err);
            self.fail_step(run, spec, &step_id, &message).await?;

            if is_cancellation(&err, run) {
                return Err(self.cancelled(run));
            }

            if attempt < max_attempts {
                tracing::warn!("Node {} failed, will retry. {}", spec.id, message);
                if retry.backoff_ms > 0 {
                    let cancellation = run.cancellation.clone();
                    let interrupted = tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(retry.backoff_ms)) => false,
                        _ = cancellation.cancelled() => true,
                    };
                    if interrupted {
                        return Err(self.cancelled(run));
                    }
                }
                continue;
            }

            return match retry.on_error {
                OnError::Continue => {
                    tracing::warn!(
                        "Node {} failed, continuing with empty output. {}",
                        spec.id,
                        message
                    );
                    run.metrics.success_count += 1;
                    Ok(vec![Vec::new(); registered.output_count()])
                }
                OnError::Stop => {
                    tracing::error!("Node {} failed: {}", spec.id, message);
                    Err(FlowError::Node {
                        node_id: spec.id.clone(),
                        source: err,
                    })
                }
            };
        }
    }

    /// Resolve parameters once, then call the capability.
    ///
    /// Once the run is cancelled the call gets `cancel_grace_ms` to finish
    /// before it is abandoned.
    async fn invoke(
        &self,
        run: &RunState<'_>,
        spec: &NodeSpec,
        registered: &RegisteredNode,
        inputs: NodeOutputs,
        iteration: Option<usize>,
        resolved: &mut Option<Value>,
    ) -> Result<Value, NodeError> {
        let parameters = match resolved {
            Some(parameters) => parameters.clone(),
            None => {
                let scope = self.expression_scope(run, &inputs, iteration);
                let parameters = resolve_parameters_async(
                    spec.parameters.clone(),
                    scope,
                    self.config.expression_limits(),
                )
                .await?;
                *resolved = Some(parameters.clone());
                parameters
            }
        };

        let ctx = NodeContext::new(
            run.execution_id.clone(),
            spec.id.clone(),
            spec.node_type.clone(),
            run.mode,
            self.events
                .create_emitter(run.execution_id.clone(), spec.id.clone()),
            run.cancellation.clone(),
            self.binary.clone(),
            run.hooks.clone(),
        )
        .with_inputs(inputs)
        .with_parameters(parameters)
        .with_iteration(iteration);

        let cancellation = run.cancellation.clone();
        let execution = registered.node.execute(ctx);
        tokio::pin!(execution);

        tokio::select! {
            biased;
            result = &mut execution => result,
            _ = cancellation.cancelled() => {
                // Cooperative nodes (and sub-workflows) get a moment to wind down
                let grace = Duration::from_millis(self.config.cancel_grace_ms);
                match tokio::time::timeout(grace, &mut execution).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Cancelled),
                }
            }
        }
    }

    async fn retry_config(
        &self,
        run: &RunState<'_>,
        spec: &NodeSpec,
        inputs: &NodeOutputs,
        iteration: Option<usize>,
    ) -> RetryConfig {
        let Some(raw) = spec.parameters.get("retryConfig") else {
            return RetryConfig::default();
        };

        let scope = self.expression_scope(run, inputs, iteration);
        let parsed = resolve_parameters_async(raw.clone(), scope, self.config.expression_limits())
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| {
                serde_json::from_value::<RetryConfig>(value).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid retryConfig on node {}: {}", spec.id, e);
                RetryConfig::default()
            }
        }
    }

    fn expression_scope(
        &self,
        run: &RunState<'_>,
        inputs: &NodeOutputs,
        iteration: Option<usize>,
    ) -> ExpressionScope {
        let first = inputs
            .first()
            .and_then(|port| port.first())
            .or_else(|| inputs.iter().find_map(|port| port.first()));

        let scope = ExpressionScope::new(run.execution_id.clone(), run.mode)
            .with_json(first.map(Item::json_value).unwrap_or_else(|| json!({})))
            .with_nodes(build_node_context_entries(run.workflow, &run.outputs, iteration));

        match iteration {
            Some(index) => {
                scope.with_loop_lane(first.map(loop_item_value).unwrap_or(Value::Null), index)
            }
            None => scope,
        }
    }

    /// Schedule downstream tokens, port by port in declared target order
    fn fan_out(
        &self,
        run: &mut RunState<'_>,
        graph: &GraphIndex,
        spec: &NodeSpec,
        outputs: &NodeOutputs,
        iteration: Option<usize>,
    ) {
        let splits_lanes = spec.node_type == self.config.loop_node_type;

        for (port, items) in outputs.iter().enumerate() {
            let targets = graph.targets(&spec.id, port);
            if targets.is_empty() {
                continue;
            }

            if splits_lanes && port == 0 {
                tracing::debug!("Node {} opens {} loop lanes", spec.id, items.len());
                for (index, item) in items.iter().enumerate() {
                    for target in targets {
                        run.queue.push_back(Token {
                            node_id: target.node.clone(),
                            port: target.port,
                            items: vec![item.clone()],
                            iteration: Some(index),
                        });
                    }
                }
            } else {
                for target in targets {
                    run.queue.push_back(Token {
                        node_id: target.node.clone(),
                        port: target.port,
                        items: items.clone(),
                        iteration,
                    });
                }
            }
        }
    }

    /// Log a step for a node whose output did not come from its capability
    async fn record_passthrough(
        &self,
        run: &RunState<'_>,
        spec: &NodeSpec,
        iteration: Option<usize>,
        input: Value,
        outputs: &NodeOutputs,
    ) -> Result<(), FlowError> {
        let started = Instant::now();
        let step_id = self.start_step(run, &spec.id, iteration, 1, input).await?;
        self.complete_step(run, spec, &step_id, outputs, started).await
    }

    async fn start_step(
        &self,
        run: &RunState<'_>,
        node_id: &str,
        iteration: Option<usize>,
        attempt: u32,
        input: Value,
    ) -> Result<String, FlowError> {
        let step = ExecutionStep {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id: run.execution_id.clone(),
            node_id: node_id.to_string(),
            iteration_index: iteration,
            attempt,
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.executions.create_execution_step(&step).await?;
        Ok(step.id)
    }

    async fn complete_step(
        &self,
        run: &RunState<'_>,
        spec: &NodeSpec,
        step_id: &str,
        outputs: &NodeOutputs,
        started: Instant,
    ) -> Result<(), FlowError> {
        let data = outputs_to_value(outputs);
        self.executions
            .update_execution_step(step_id, StepUpdate::success(data.clone()))
            .await?;
        self.events.emit(ExecutionEvent::NodeExecuteAfter {
            execution_id: run.execution_id.clone(),
            node_id: spec.id.clone(),
            node_type: spec.node_type.clone(),
            data,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn fail_step(
        &self,
        run: &RunState<'_>,
        spec: &NodeSpec,
        step_id: &str,
        message: &str,
    ) -> Result<(), FlowError> {
        self.executions
            .update_execution_step(step_id, StepUpdate::failure(message))
            .await?;
        self.events.emit(ExecutionEvent::NodeExecuteError {
            execution_id: run.execution_id.clone(),
            node_id: spec.id.clone(),
            node_type: spec.node_type.clone(),
            error: message.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn emit_before(&self, run: &RunState<'_>, spec: &NodeSpec, attempt: u32) {
        self.events.emit(ExecutionEvent::NodeExecuteBefore {
            execution_id: run.execution_id.clone(),
            node_id: spec.id.clone(),
            node_type: spec.node_type.clone(),
            attempt,
            timestamp: Utc::now(),
        });
    }

    fn check_cancelled(&self, run: &RunState<'_>) -> Result<(), FlowError> {
        if run.cancellation.is_cancelled() {
            Err(self.cancelled(run))
        } else {
            Ok(())
        }
    }

    fn cancelled(&self, run: &RunState<'_>) -> FlowError {
        let reason = if run.timed_out.load(Ordering::SeqCst) {
            format!(
                "execution timed out after {}ms",
                run.workflow.settings.execution_timeout_ms.unwrap_or_default()
            )
        } else {
            "execution was canceled".to_string()
        };
        FlowError::Cancelled { reason }
    }
}

fn is_cancellation(err: &NodeError, run: &RunState<'_>) -> bool {
    matches!(err, NodeError::Cancelled) || run.cancellation.is_cancelled()
}

fn first_port(outputs: NodeOutputs) -> ItemList {
    outputs.into_iter().next().unwrap_or_default()
}

/// Trip the run's token once the workflow's timeout elapses
fn spawn_timer(
    workflow: &Workflow,
    cancellation: &CancellationToken,
    timed_out: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let timeout_ms = workflow.settings.execution_timeout_ms.filter(|ms| *ms > 0)?;
    let token = cancellation.clone();
    let flag = timed_out.clone();

    Some(tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                tracing::warn!("Execution timed out after {}ms", timeout_ms);
                flag.store(true, Ordering::SeqCst);
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    }))
}

/// Result of a successful workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    /// Aggregated outputs of every sink node that produced output
    pub outputs: BTreeMap<NodeId, NodeOutputs>,
    pub metrics: ExecutionMetrics,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn node_output(&self, node_id: &str) -> Option<&NodeOutputs> {
        self.outputs.get(node_id)
    }

    /// Port-0 items of every sink, concatenated in node id order
    pub fn sink_items(&self) -> ItemList {
        self.outputs
            .values()
            .filter_map(|outputs| outputs.first())
            .flat_map(|items| items.iter().cloned())
            .collect()
    }
}
