// crates/relaycore/tests/model_test.rs

use relaycore::{
    EventBus, ExecutionEvent, Item, NodeEvent, NodeSpec, Workflow, WorkflowSettings,
};
use serde_json::json;

#[test]
fn workflow_loads_from_minimal_json() {
    let wf: Workflow = serde_json::from_value(json!({
        "id": "wf-1",
        "name": "minimal",
        "nodes": [
            {"id": "a", "node_type": "trigger.manual"},
            {"id": "b", "node_type": "debug.log", "name": "Log", "parameters": {"message": "hi"}}
        ],
        "connections": [
            {"source_node": "a", "targets": [{"node": "b"}]}
        ]
    }))
    .unwrap();

    assert_eq!(wf.settings.max_nodes_per_execution, 1000);
    assert_eq!(wf.settings.execution_timeout_ms, None);
    assert_eq!(wf.connections[0].source_port, 0);
    assert_eq!(wf.connections[0].targets[0].port, 0);
    assert_eq!(wf.find_node("b").map(NodeSpec::label), Some("Log"));
    assert_eq!(wf.find_node("a").map(NodeSpec::label), Some("a"));
}

#[test]
fn connect_groups_targets_by_source_port() {
    let mut wf = Workflow::new("fan-out");
    wf.add_node(NodeSpec::new("a", "x"));
    wf.add_node(NodeSpec::new("b", "x"));
    wf.add_node(NodeSpec::new("c", "x"));
    wf.connect("a", 0, "b", 0);
    wf.connect("a", 0, "c", 0);
    wf.connect("a", 1, "c", 1);

    assert_eq!(wf.connections.len(), 2);
    let port0: Vec<&str> = wf.connections[0]
        .targets
        .iter()
        .map(|t| t.node.as_str())
        .collect();
    assert_eq!(port0, vec!["b", "c"]);
}

#[test]
fn retry_builder_writes_retry_config() {
    let spec = NodeSpec::new("a", "x").with_retry(3, 250, "continue");
    assert_eq!(
        spec.parameters["retryConfig"],
        json!({"maxRetries": 3, "backoffMs": 250, "onError": "continue"})
    );
}

#[test]
fn default_settings() {
    let settings = WorkflowSettings::default();
    assert_eq!(settings.max_nodes_per_execution, 1000);
    assert!(settings.execution_timeout_ms.is_none());
}

#[test]
fn items_wrap_primitives() {
    assert_eq!(Item::from_value(json!(5)).json_value(), json!({"value": 5}));
    assert!(Item::from_value(json!(null)).json.is_empty());
    assert_eq!(Item::from(json!({"a": 1})).get("a"), Some(&json!(1)));
}

#[tokio::test]
async fn emitter_events_reach_subscribers() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();

    let emitter = bus.create_emitter("exec-1".to_string(), "node-1".to_string());
    emitter.info("hello");
    emitter.progress(50.0, None);

    match rx.recv().await.unwrap() {
        ExecutionEvent::NodeEvent {
            execution_id,
            node_id,
            event: NodeEvent::Info { message },
            ..
        } => {
            assert_eq!(execution_id, "exec-1");
            assert_eq!(node_id, "node-1");
            assert_eq!(message, "hello");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(
        rx.recv().await.unwrap(),
        ExecutionEvent::NodeEvent {
            event: NodeEvent::Progress { .. },
            ..
        }
    ));
}

#[test]
fn emitting_without_subscribers_is_harmless() {
    let bus = EventBus::default();
    bus.create_emitter("e".to_string(), "n".to_string()).warn("nobody listens");
}
