//! Per-run output bookkeeping and the `$node` view built from it.

use crate::executor::WorkflowExecutor;
use async_trait::async_trait;
use relaycore::{
    ExecutionHooks, ExecutionId, ExecutionMode, ExecutionStateUpdate, ExecutionStore, FlowError,
    Item, ItemList, NodeError, NodeId, NodeOutputs, Workflow,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Latest outputs of every node, bucketed by iteration key.
///
/// A retry overwrites its bucket; step history is kept by the store.
#[derive(Debug, Default)]
pub struct OutputStore {
    buckets: HashMap<NodeId, BTreeMap<Option<usize>, NodeOutputs>>,
    last_written: HashMap<NodeId, Option<usize>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, node_id: &str, iteration: Option<usize>, outputs: NodeOutputs) {
        self.buckets
            .entry(node_id.to_string())
            .or_default()
            .insert(iteration, outputs);
        self.last_written.insert(node_id.to_string(), iteration);
    }

    /// Outputs visible from `iteration`: the same lane, then the top-level
    /// bucket, then whichever bucket was written last
    pub fn lookup(&self, node_id: &str, iteration: Option<usize>) -> Option<&NodeOutputs> {
        let buckets = self.buckets.get(node_id)?;
        buckets
            .get(&iteration)
            .or_else(|| buckets.get(&None))
            .or_else(|| {
                self.last_written
                    .get(node_id)
                    .and_then(|key| buckets.get(key))
            })
    }

    /// All buckets of a node merged port by port, top-level first then by
    /// ascending iteration
    pub fn merged(&self, node_id: &str) -> Option<NodeOutputs> {
        let buckets = self.buckets.get(node_id)?;
        let mut merged: NodeOutputs = Vec::new();
        for outputs in buckets.values() {
            if merged.len() < outputs.len() {
                merged.resize_with(outputs.len(), Vec::new);
            }
            for (port, items) in outputs.iter().enumerate() {
                merged[port].extend(items.iter().cloned());
            }
        }
        Some(merged)
    }
}

/// Build the `$node` map for a consumer running in `iteration`.
///
/// Keys are node labels (name, falling back to id).
pub fn build_node_context_entries(
    workflow: &Workflow,
    outputs: &OutputStore,
    iteration: Option<usize>,
) -> Map<String, Value> {
    let mut entries = Map::new();
    for spec in &workflow.nodes {
        let Some(node_outputs) = outputs.lookup(&spec.id, iteration) else {
            continue;
        };
        let items: &[Item] = node_outputs.first().map(Vec::as_slice).unwrap_or(&[]);
        let first = items.first();

        let entry = json!({
            "json": first.map(Item::json_value).unwrap_or_else(|| json!({})),
            "binary": first
                .map(|item| serde_json::to_value(&item.binary).unwrap_or_else(|_| json!({})))
                .unwrap_or_else(|| json!({})),
            "items": serde_json::to_value(items).unwrap_or_else(|_| json!([])),
        });
        entries.insert(spec.label().to_string(), entry);
    }
    entries
}

/// The value `$item` takes for a loop lane element.
///
/// Wrapped primitives (`{"value": x}`) unwrap to `x`.
pub(crate) fn loop_item_value(item: &Item) -> Value {
    match item.json.get("value") {
        Some(value) if item.json.len() == 1 => value.clone(),
        _ => item.json_value(),
    }
}

/// Engine callbacks handed to capabilities of one run
pub(crate) struct RunHooks {
    pub(crate) executor: WorkflowExecutor,
    pub(crate) execution_id: ExecutionId,
    pub(crate) cancellation: CancellationToken,
}

#[async_trait]
impl ExecutionHooks for RunHooks {
    async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
    ) -> Result<ItemList, NodeError> {
        let workflow = self
            .executor
            .workflow_store()
            .get_workflow(workflow_id)
            .await
            .map_err(|e| NodeError::SubWorkflow(e.to_string()))?;

        let child_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "Execution {} starting sub-workflow {} as {}",
            self.execution_id,
            workflow_id,
            child_id
        );

        let result = self
            .executor
            .run_with_mode(
                &child_id,
                &workflow,
                input,
                Some(self.cancellation.clone()),
                ExecutionMode::Subworkflow,
                Some(self.execution_id.clone()),
            )
            .await;

        match result {
            Ok(result) => Ok(result.sink_items()),
            Err(_) if self.cancellation.is_cancelled() => Err(NodeError::Cancelled),
            Err(FlowError::Node { source, .. }) => Err(NodeError::SubWorkflow(source.to_string())),
            Err(e) => Err(NodeError::SubWorkflow(e.to_string())),
        }
    }

    async fn update_state(&self, update: ExecutionStateUpdate) -> Result<(), NodeError> {
        self.executor
            .execution_store()
            .update_execution_state(&self.execution_id, update)
            .await
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycore::NodeSpec;

    fn outputs(values: &[&str]) -> NodeOutputs {
        vec![values
            .iter()
            .map(|v| Item::from_value(json!({ "v": v })))
            .collect()]
    }

    #[test]
    fn lookup_prefers_lane_then_top_level_then_latest() {
        let mut store = OutputStore::new();
        store.record("a", Some(1), outputs(&["lane1"]));
        store.record("a", Some(2), outputs(&["lane2"]));

        assert_eq!(store.lookup("a", Some(1)).unwrap()[0][0].get("v"), Some(&json!("lane1")));
        // no top-level bucket: falls back to the last write
        assert_eq!(store.lookup("a", None).unwrap()[0][0].get("v"), Some(&json!("lane2")));

        store.record("a", None, outputs(&["top"]));
        assert_eq!(store.lookup("a", Some(7)).unwrap()[0][0].get("v"), Some(&json!("top")));
        assert!(store.lookup("b", None).is_none());
    }

    #[test]
    fn retries_overwrite_their_bucket() {
        let mut store = OutputStore::new();
        store.record("a", None, outputs(&["first"]));
        store.record("a", None, outputs(&["second"]));
        assert_eq!(store.lookup("a", None).unwrap()[0].len(), 1);
        assert_eq!(store.lookup("a", None).unwrap()[0][0].get("v"), Some(&json!("second")));
    }

    #[test]
    fn merged_orders_top_level_first() {
        let mut store = OutputStore::new();
        store.record("a", Some(1), outputs(&["one"]));
        store.record("a", Some(0), outputs(&["zero"]));
        store.record("a", None, outputs(&["top"]));

        let merged = store.merged("a").unwrap();
        let values: Vec<&Value> = merged[0].iter().filter_map(|i| i.get("v")).collect();
        assert_eq!(values, vec![&json!("top"), &json!("zero"), &json!("one")]);
    }

    #[test]
    fn node_entries_use_labels() {
        let mut workflow = Workflow::new("wf");
        workflow.add_node(NodeSpec::new("n1", "noop").with_name("Fetch"));
        workflow.add_node(NodeSpec::new("n2", "noop"));

        let mut store = OutputStore::new();
        store.record("n1", None, outputs(&["x", "y"]));
        store.record("n2", None, vec![Vec::new()]);

        let entries = build_node_context_entries(&workflow, &store, None);
        assert_eq!(entries["Fetch"]["json"], json!({"v": "x"}));
        assert_eq!(entries["Fetch"]["items"].as_array().unwrap().len(), 2);
        assert_eq!(entries["n2"]["json"], json!({}));
        assert!(!entries.contains_key("n1"));
    }

    #[test]
    fn loop_items_unwrap_primitives() {
        assert_eq!(loop_item_value(&Item::from_value(json!("a"))), json!("a"));
        assert_eq!(
            loop_item_value(&Item::from_value(json!({"name": "a"}))),
            json!({"name": "a"})
        );
    }
}
