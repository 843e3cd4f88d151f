use async_trait::async_trait;
use relaycore::{
    EventBus, ExecutionEvent, ExecutionStatus, FlowError, Item, MemoryStore, Node, NodeContext,
    NodeDescription, NodeError, NodeSpec, StepStatus, Workflow, WorkflowError,
};
use relayruntime::{EngineConfig, NodeRegistry, WorkflowExecutor};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("relayruntime=debug")
        .with_test_writer()
        .try_init();
}

enum Behavior {
    /// Return every input item, all ports concatenated
    Echo,
    /// Return the resolved parameters as one item
    Params,
    /// Return an empty port-0 list
    Empty,
    Fail,
    /// Fail until the counter runs out, then echo
    Flaky(AtomicUsize),
    /// Wait for cancellation
    Slow,
    /// Sleep for a while without looking at the token, then echo
    Stubborn(Duration),
    /// Run the workflow named by the `workflowId` parameter
    SubWorkflow,
}

struct TestNode {
    description: NodeDescription,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl TestNode {
    fn action(name: &str, behavior: Behavior) -> Arc<Self> {
        Self::with_description(NodeDescription::action(name, name), behavior)
    }

    fn with_description(description: NodeDescription, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            description,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

fn echo(ctx: &NodeContext) -> Value {
    let items: Vec<Item> = ctx.all_inputs().concat();
    serde_json::to_value(items).unwrap()
}

#[async_trait]
impl Node for TestNode {
    fn node_type(&self) -> &str {
        &self.description.name
    }

    fn description(&self) -> NodeDescription {
        self.description.clone()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Echo => Ok(echo(&ctx)),
            Behavior::Params => Ok(ctx.parameters.clone()),
            Behavior::Empty => Ok(json!([])),
            Behavior::Fail => Err(NodeError::ExecutionFailed("boom".to_string())),
            Behavior::Flaky(remaining) => {
                if remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    Err(NodeError::ExecutionFailed("flaky".to_string()))
                } else {
                    Ok(echo(&ctx))
                }
            }
            Behavior::Slow => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!({"done": true})),
                    _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
                }
            }
            Behavior::Stubborn(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(echo(&ctx))
            }
            Behavior::SubWorkflow => {
                let workflow_id = ctx.require_str("workflowId")?.to_string();
                let input = ctx.current_item().map(Item::json_value).unwrap_or(Value::Null);
                let items = ctx.execute_workflow(&workflow_id, input).await?;
                Ok(serde_json::to_value(items).unwrap())
            }
        }
    }
}

struct Harness {
    executor: WorkflowExecutor,
    store: MemoryStore,
    events: Arc<EventBus>,
}

fn harness(extra: Vec<Arc<TestNode>>) -> Harness {
    harness_with_config(extra, EngineConfig::default())
}

fn harness_with_config(extra: Vec<Arc<TestNode>>, config: EngineConfig) -> Harness {
    init_tracing();
    let mut registry = NodeRegistry::new();
    let defaults = vec![
        TestNode::with_description(
            NodeDescription::trigger("test.trigger", "Trigger", false),
            Behavior::Echo,
        ),
        TestNode::with_description(
            NodeDescription::trigger("test.exec_trigger", "Executable trigger", true),
            Behavior::Params,
        ),
        TestNode::action("test.echo", Behavior::Echo),
        TestNode::action("flow.loop", Behavior::Echo),
        TestNode::action("test.params", Behavior::Params),
        TestNode::action("test.empty", Behavior::Empty),
        TestNode::action("test.fail", Behavior::Fail),
        TestNode::action("test.slow", Behavior::Slow),
        TestNode::action("test.subworkflow", Behavior::SubWorkflow),
        TestNode::with_description(
            NodeDescription::action("test.join", "Join").with_ports(2, 1),
            Behavior::Echo,
        ),
    ];
    for node in defaults.into_iter().chain(extra) {
        registry.register(node).unwrap();
    }

    let store = MemoryStore::new();
    let events = Arc::new(EventBus::new(1000));
    let executor = WorkflowExecutor::new(
        Arc::new(registry),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .with_event_bus(events.clone())
    .with_config(config);

    Harness {
        executor,
        store,
        events,
    }
}

fn chain(types: &[(&str, &str)]) -> Workflow {
    let mut wf = Workflow::new("chain");
    for (id, node_type) in types {
        wf.add_node(NodeSpec::new(*id, *node_type));
    }
    for pair in types.windows(2) {
        wf.connect(pair[0].0, 0, pair[1].0, 0);
    }
    wf
}

#[tokio::test]
async fn rejects_more_than_one_trigger() {
    let h = harness(vec![]);
    let mut wf = chain(&[("t1", "test.trigger"), ("a", "test.echo")]);
    wf.add_node(NodeSpec::new("t2", "test.trigger"));

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::MultipleTriggers(ref ids)) if ids.len() == 2
    ));

    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Error);
    assert!(h.store.list_steps("e1").await.is_empty());
}

#[tokio::test]
async fn trigger_output_seeds_downstream() {
    let h = harness(vec![]);
    let wf = chain(&[("t", "test.trigger"), ("a", "test.echo")]);

    let result = h.executor.run("e1", &wf, json!({"x": 5}), None).await.unwrap();

    let items = &result.node_output("a").unwrap()[0];
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("x"), Some(&json!(5)));
    assert_eq!(h.store.node_steps("e1", "t").await.len(), 1);
    assert_eq!(result.metrics.node_count, 2);
    assert_eq!(result.metrics.success_count, 2);

    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.metrics, result.metrics);
}

#[tokio::test]
async fn executable_trigger_runs_with_resolved_parameters() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("wf");
    wf.add_node(
        NodeSpec::new("t", "test.exec_trigger").with_parameter("doubled", "{{ $json.x * 2 }}"),
    );

    let result = h.executor.run("e1", &wf, json!({"x": 4}), None).await.unwrap();
    assert_eq!(result.node_output("t").unwrap()[0][0].get("doubled"), Some(&json!(8)));
}

#[tokio::test]
async fn workflows_without_trigger_seed_every_entry_node() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("entries");
    wf.add_node(NodeSpec::new("a", "test.echo"));
    wf.add_node(NodeSpec::new("b", "test.echo"));

    let result = h.executor.run("e1", &wf, json!({"seed": true}), None).await.unwrap();
    for id in ["a", "b"] {
        assert_eq!(result.node_output(id).unwrap()[0][0].get("seed"), Some(&json!(true)));
    }
}

#[tokio::test]
async fn join_waits_for_every_expected_port() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("diamond");
    for (id, node_type) in [
        ("start", "test.echo"),
        ("left", "test.echo"),
        ("right", "test.echo"),
        ("join", "test.join"),
    ] {
        wf.add_node(NodeSpec::new(id, node_type));
    }
    wf.connect("start", 0, "left", 0);
    wf.connect("start", 0, "right", 0);
    wf.connect("left", 0, "join", 0);
    wf.connect("right", 0, "join", 1);

    let result = h.executor.run("e1", &wf, json!({"v": 1}), None).await.unwrap();

    let join_steps = h.store.node_steps("e1", "join").await;
    assert_eq!(join_steps.len(), 1);
    assert_eq!(result.node_output("join").unwrap()[0].len(), 2);
    assert_eq!(result.outputs.len(), 1);
}

#[tokio::test]
async fn empty_outputs_propagate_as_dead_paths() {
    let h = harness(vec![]);
    let wf = chain(&[("a", "test.empty"), ("b", "test.echo"), ("c", "test.echo")]);

    let result = h.executor.run("e1", &wf, json!({}), None).await.unwrap();

    assert_eq!(result.metrics.node_count, 1);
    assert_eq!(result.node_output("c").unwrap(), &vec![Vec::<Item>::new()]);
    let steps = h.store.node_steps("e1", "b").await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Success);
}

#[tokio::test]
async fn retry_converges_after_one_failure() {
    let flaky = TestNode::action("test.flaky", Behavior::Flaky(AtomicUsize::new(1)));
    let h = harness(vec![flaky.clone()]);
    let mut wf = Workflow::new("retry");
    wf.add_node(NodeSpec::new("a", "test.flaky").with_retry(2, 0, "stop"));

    let result = h.executor.run("e1", &wf, json!({"v": 1}), None).await.unwrap();

    let steps = h.store.node_steps("e1", "a").await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].status, StepStatus::Error);
    assert!(steps[0].error.as_deref().unwrap().starts_with("Attempt 1/3"));
    assert_eq!(steps[1].status, StepStatus::Success);
    assert_eq!(steps[1].attempt, 2);
    assert_eq!(result.metrics.retry_count, 1);
    assert_eq!(result.metrics.node_count, 2);
    assert_eq!(result.metrics.success_count, 1);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retries_stop_the_run() {
    let h = harness(vec![]);
    let mut wf = chain(&[("a", "test.fail"), ("b", "test.echo")]);
    wf.nodes[0] = NodeSpec::new("a", "test.fail").with_retry(2, 5, "stop");

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(matches!(err, FlowError::Node { ref node_id, .. } if node_id == "a"));

    let steps = h.store.node_steps("e1", "a").await;
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.status == StepStatus::Error));
    assert!(h.store.node_steps("e1", "b").await.is_empty());

    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Error);
    assert_eq!(execution.metrics.error_count, 1);
    assert_eq!(execution.metrics.retry_count, 2);
}

#[tokio::test]
async fn continue_on_error_yields_empty_output() {
    let h = harness(vec![]);
    let mut wf = chain(&[("a", "test.fail"), ("b", "test.echo")]);
    wf.nodes[0] = NodeSpec::new("a", "test.fail").with_retry(0, 0, "continue");

    let result = h.executor.run("e1", &wf, json!({}), None).await.unwrap();

    assert_eq!(result.node_output("b").unwrap(), &vec![Vec::<Item>::new()]);
    assert_eq!(result.metrics.success_count, 1);
    assert_eq!(h.store.node_steps("e1", "a").await.len(), 1);
}

#[tokio::test]
async fn loop_lanes_are_isolated() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("loop");
    wf.add_node(NodeSpec::new("split", "flow.loop"));
    wf.add_node(NodeSpec::new("body", "test.params").with_parameters(json!({
        "item": "{{ $item }}",
        "index": "{{ $index }}"
    })));
    wf.connect("split", 0, "body", 0);

    let result = h.executor.run("e1", &wf, json!(["a", "b", "c"]), None).await.unwrap();

    let items = &result.node_output("body").unwrap()[0];
    let lanes: Vec<(Value, Value)> = items
        .iter()
        .map(|i| (i.get("item").cloned().unwrap(), i.get("index").cloned().unwrap()))
        .collect();
    assert_eq!(
        lanes,
        vec![
            (json!("a"), json!(0)),
            (json!("b"), json!(1)),
            (json!("c"), json!(2)),
        ]
    );

    let iterations: Vec<Option<usize>> = h
        .store
        .node_steps("e1", "body")
        .await
        .iter()
        .map(|s| s.iteration_index)
        .collect();
    assert_eq!(iterations, vec![Some(0), Some(1), Some(2)]);
}

#[tokio::test]
async fn loop_lanes_join_within_their_own_iteration() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("loop-join");
    for (id, node_type) in [
        ("split", "flow.loop"),
        ("left", "test.echo"),
        ("right", "test.echo"),
        ("join", "test.join"),
    ] {
        wf.add_node(NodeSpec::new(id, node_type));
    }
    wf.connect("split", 0, "left", 0);
    wf.connect("split", 0, "right", 0);
    wf.connect("left", 0, "join", 0);
    wf.connect("right", 0, "join", 1);

    let result = h.executor.run("e1", &wf, json!([{"n": 1}, {"n": 2}]), None).await.unwrap();

    let joins = h.store.node_steps("e1", "join").await;
    assert_eq!(joins.len(), 2);
    let items = &result.node_output("join").unwrap()[0];
    let values: Vec<&Value> = items.iter().filter_map(|i| i.get("n")).collect();
    assert_eq!(values, vec![&json!(1), &json!(1), &json!(2), &json!(2)]);
}

#[tokio::test]
async fn external_cancel_marks_execution_canceled() {
    let h = harness(vec![]);
    let wf = chain(&[("a", "test.slow"), ("b", "test.echo")]);
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h.executor.run("e1", &wf, json!({}), Some(token)).await.unwrap_err();
    assert!(err.is_cancellation());

    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert!(h.store.node_steps("e1", "b").await.is_empty());
    assert!(!h.executor.manager().is_running("e1").await);
}

#[tokio::test]
async fn late_result_after_cancel_is_not_a_success() {
    let busy = TestNode::action("test.busy", Behavior::Stubborn(Duration::from_millis(200)));
    let h = harness(vec![busy]);
    let wf = chain(&[("a", "test.busy")]);
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    // The node finishes inside the grace window but the run was already cancelled
    let err = h.executor.run("e1", &wf, json!({}), Some(token)).await.unwrap_err();
    assert!(err.is_cancellation());

    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.metrics.error_count, 0);
    let steps = h.store.node_steps("e1", "a").await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Error);
}

#[tokio::test]
async fn cancel_grace_is_configurable() {
    let busy = TestNode::action("test.busy", Behavior::Stubborn(Duration::from_secs(5)));
    let config = EngineConfig {
        cancel_grace_ms: 20,
        ..EngineConfig::default()
    };
    let h = harness_with_config(vec![busy], config);
    let mut wf = chain(&[("a", "test.busy")]);
    wf.settings.execution_timeout_ms = Some(30);

    let started = std::time::Instant::now();
    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(err.is_cancellation());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn execution_timeout_cancels_the_run() {
    let h = harness(vec![]);
    let mut wf = chain(&[("a", "test.slow")]);
    wf.settings.execution_timeout_ms = Some(50);

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    match err {
        FlowError::Cancelled { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(
        h.store.get_execution("e1").await.unwrap().status,
        ExecutionStatus::Canceled
    );
}

#[tokio::test]
async fn manager_cancels_running_execution() {
    let h = harness(vec![]);
    let wf = chain(&[("a", "test.slow")]);
    let executor = h.executor.clone();

    let handle = tokio::spawn(async move { executor.run("e1", &wf, json!({}), None).await });

    let manager = h.executor.manager().clone();
    for _ in 0..100 {
        if manager.is_running("e1").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(manager.cancel("e1").await);

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn backoff_sleep_is_cancellable() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("backoff");
    wf.add_node(NodeSpec::new("a", "test.fail").with_retry(3, 60_000, "stop"));
    wf.settings.execution_timeout_ms = Some(50);

    let started = std::time::Instant::now();
    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(err.is_cancellation());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.store.node_steps("e1", "a").await.len(), 1);
}

#[tokio::test]
async fn visit_limit_stops_cycles() {
    let config = EngineConfig {
        max_node_visits: 5,
        ..EngineConfig::default()
    };
    let h = harness_with_config(vec![], config);
    let mut wf = chain(&[("s", "test.echo"), ("a", "test.echo"), ("b", "test.echo")]);
    wf.connect("b", 0, "a", 0);

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(matches!(err, FlowError::ResourceLimit(_)));
    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Error);
    assert_eq!(execution.metrics.error_count, 1);
}

#[tokio::test]
async fn node_count_limit_is_enforced() {
    let h = harness(vec![]);
    let mut wf = chain(&[("a", "test.echo"), ("b", "test.echo"), ("c", "test.echo")]);
    wf.settings.max_nodes_per_execution = 2;

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(matches!(err, FlowError::ResourceLimit(_)));
    assert!(h.store.node_steps("e1", "c").await.is_empty());
}

#[tokio::test]
async fn expressions_resolve_against_input_and_node_outputs() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("expressions");
    wf.add_node(
        NodeSpec::new("src", "test.params")
            .with_name("Source")
            .with_parameter("v", json!(7)),
    );
    wf.add_node(NodeSpec::new("dst", "test.params").with_parameters(json!({
        "whole": "{{ $json.v }}",
        "inline": "a{{ $json.v }}b",
        "fromNode": "{{ $node['Source'].json.v + 1 }}",
        "execution": "{{ $execution.id }}"
    })));
    wf.connect("src", 0, "dst", 0);

    let result = h.executor.run("e1", &wf, json!({}), None).await.unwrap();
    let item = &result.node_output("dst").unwrap()[0][0];
    assert_eq!(item.get("whole"), Some(&json!(7)));
    assert_eq!(item.get("inline"), Some(&json!("a7b")));
    assert_eq!(item.get("fromNode"), Some(&json!(8)));
    assert_eq!(item.get("execution"), Some(&json!("e1")));
}

#[tokio::test]
async fn parameter_errors_count_as_failed_attempts() {
    let h = harness(vec![]);
    let mut wf = Workflow::new("bad-expression");
    wf.add_node(
        NodeSpec::new("a", "test.params")
            .with_parameter("broken", "{{ $json. }}")
            .with_retry(1, 0, "stop"),
    );

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Node { source: NodeError::Parameter(_), .. }
    ));
    assert_eq!(h.store.node_steps("e1", "a").await.len(), 2);
}

#[tokio::test]
async fn slow_expressions_fail_the_attempt_with_a_timeout() {
    let config = EngineConfig {
        expression_timeout_ms: 1,
        ..EngineConfig::default()
    };
    let h = harness_with_config(vec![], config);
    let mut wf = Workflow::new("slow-expression");
    wf.add_node(NodeSpec::new("a", "test.params").with_parameter(
        "text",
        "{{ (() => { let s = ''; for (let i = 0; i < 90000; i++) { s += String(i % 10); } \
         return s.length; })() }}",
    ));

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    match err {
        FlowError::Node {
            source: NodeError::Parameter(message),
            ..
        } => assert!(message.contains("exceeded"), "unexpected message: {message}"),
        other => panic!("expected a parameter error, got {other:?}"),
    }

    let steps = h.store.node_steps("e1", "a").await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Error);
    assert!(steps[0].error.as_deref().unwrap().starts_with("Attempt 1/1"));
}

#[tokio::test]
async fn pinned_data_replaces_capability_output() {
    let h = harness(vec![]);
    let mut wf = chain(&[("a", "test.fail"), ("b", "test.echo")]);
    wf.nodes[0] = NodeSpec::new("a", "test.fail").with_pinned_data(json!({"pinned": 1}));

    let result = h.executor.run("e1", &wf, json!({}), None).await.unwrap();

    assert_eq!(result.node_output("b").unwrap()[0][0].get("pinned"), Some(&json!(1)));
    assert_eq!(result.metrics.node_count, 1);
}

#[tokio::test]
async fn unknown_node_types_fail_before_dispatch() {
    let h = harness(vec![]);
    let wf = chain(&[("a", "test.echo"), ("b", "does.not.exist")]);

    let err = h.executor.run("e1", &wf, json!({}), None).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::UnknownNodeType(_))
    ));
    assert!(h.store.list_steps("e1").await.is_empty());
}

#[tokio::test]
async fn sub_workflow_returns_child_sink_items() {
    let h = harness(vec![]);
    let mut child = chain(&[("inner", "test.params")]).with_id("child");
    child.nodes[0] =
        NodeSpec::new("inner", "test.params").with_parameter("doubled", "{{ $json.n * 2 }}");
    h.store.save_workflow(child).await;

    let mut parent = Workflow::new("parent");
    parent.add_node(
        NodeSpec::new("call", "test.subworkflow").with_parameter("workflowId", "child"),
    );

    let result = h.executor.run("parent-1", &parent, json!({"n": 21}), None).await.unwrap();
    assert_eq!(result.node_output("call").unwrap()[0][0].get("doubled"), Some(&json!(42)));

    let executions = h.store.list_executions().await;
    let child_execution = executions
        .iter()
        .find(|e| e.parent_execution_id.as_deref() == Some("parent-1"))
        .unwrap();
    assert_eq!(child_execution.workflow_id, "child");
    assert_eq!(child_execution.mode, relaycore::ExecutionMode::Subworkflow);
    assert_eq!(child_execution.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn cancelling_parent_cancels_child() {
    let h = harness(vec![]);
    h.store
        .save_workflow(chain(&[("inner", "test.slow")]).with_id("slow-child"))
        .await;

    let mut parent = Workflow::new("parent");
    parent.add_node(
        NodeSpec::new("call", "test.subworkflow").with_parameter("workflowId", "slow-child"),
    );

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h.executor.run("parent-1", &parent, json!({}), Some(token)).await.unwrap_err();
    assert!(err.is_cancellation());

    let executions = h.store.list_executions().await;
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Canceled));
}

#[tokio::test]
async fn child_timeout_does_not_cancel_parent() {
    let h = harness(vec![]);
    let mut child = chain(&[("inner", "test.slow")]).with_id("slow-child");
    child.settings.execution_timeout_ms = Some(30);
    h.store.save_workflow(child).await;

    let mut parent = chain(&[("call", "test.subworkflow"), ("after", "test.echo")]);
    parent.nodes[0] = NodeSpec::new("call", "test.subworkflow")
        .with_parameter("workflowId", "slow-child")
        .with_retry(0, 0, "continue");

    let result = h.executor.run("parent-1", &parent, json!({}), None).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.node_output("after").unwrap(), &vec![Vec::<Item>::new()]);
}

#[tokio::test]
async fn lifecycle_events_are_emitted() {
    let h = harness(vec![]);
    let mut events = h.events.subscribe();
    let wf = chain(&[("a", "test.echo")]);

    h.executor.run("e1", &wf, json!({}), None).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.execution_id(), "e1");
        kinds.push(match event {
            ExecutionEvent::NodeExecuteBefore { .. } => "before",
            ExecutionEvent::NodeExecuteAfter { .. } => "after",
            ExecutionEvent::NodeExecuteError { .. } => "error",
            ExecutionEvent::ExecutionFinish { status, .. } => {
                assert_eq!(status, ExecutionStatus::Success);
                "finish"
            }
            ExecutionEvent::NodeEvent { .. } => "node",
        });
    }
    assert_eq!(kinds, vec!["before", "after", "finish"]);
}

#[tokio::test]
async fn cursor_tracks_last_dispatched_node() {
    let h = harness(vec![]);
    let wf = chain(&[("a", "test.echo"), ("b", "test.echo")]);

    h.executor.run("e1", &wf, json!({}), None).await.unwrap();

    let execution = h.store.get_execution("e1").await.unwrap();
    assert_eq!(execution.current_node_id.as_deref(), Some("b"));
    assert!(execution.finished_at.is_some());
}
