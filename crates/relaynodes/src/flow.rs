use async_trait::async_trait;
use relaycore::{
    Item, ItemList, Node, NodeContext, NodeDescription, NodeError, ParameterDefinition,
};
use serde_json::Value;

/// Loop splitter. Passes items through; the engine opens one lane per item.
pub struct LoopNode;

#[async_trait]
impl Node for LoopNode {
    fn node_type(&self) -> &str {
        "flow.loop"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("flow.loop", "Loop Over Items")
            .with_category("flow")
            .with_description("Runs downstream nodes once per input item")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        ctx.events.info(format!("Splitting {} items", ctx.items().len()));
        crate::items_output(ctx.items())
    }
}

/// Routes items to port 0 (true) or port 1 (false)
pub struct IfNode;

impl IfNode {
    fn matches(item: &Item, field: &str, expected: Option<&Value>) -> bool {
        match (item.get(field), expected) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(actual), None) => is_truthy(actual),
            (None, _) => false,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        "flow.if"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("flow.if", "If")
            .with_category("flow")
            .with_ports(1, 2)
            .with_description("Splits items into a true and a false branch")
            .with_property(ParameterDefinition::optional(
                "condition",
                "Value deciding the branch for all items",
                Value::Bool(false),
            ))
            .with_property(ParameterDefinition::optional(
                "field",
                "Decide per item from this field instead",
                Value::Null,
            ))
            .with_property(ParameterDefinition::optional(
                "equals",
                "Compare the field against this value instead of its truthiness",
                Value::Null,
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let items = ctx.items().to_vec();

        let field = ctx.parameter("field").and_then(Value::as_str);
        let (on_true, on_false): (ItemList, ItemList) = match field {
            Some(field) => {
                let expected = ctx.parameter("equals").filter(|v| !v.is_null());
                items
                    .into_iter()
                    .partition(|item| Self::matches(item, field, expected))
            }
            None => {
                let condition = ctx.parameter_or("condition", Value::Bool(false));
                if is_truthy(&condition) {
                    (items, Vec::new())
                } else {
                    (Vec::new(), items)
                }
            }
        };

        ctx.events.info(format!(
            "{} items true, {} items false",
            on_true.len(),
            on_false.len()
        ));
        crate::ports_output(&[on_true, on_false])
    }
}

/// Joins two inputs into one list
pub struct MergeNode;

#[async_trait]
impl Node for MergeNode {
    fn node_type(&self) -> &str {
        "flow.merge"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("flow.merge", "Merge")
            .with_category("flow")
            .with_ports(2, 1)
            .with_description("Waits for both inputs and combines their items")
            .with_property(ParameterDefinition::optional(
                "mode",
                "append: concatenate inputs; combine: merge fields pairwise",
                Value::String("append".to_string()),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let left = ctx.input_items(0);
        let right = ctx.input_items(1);
        let mode = ctx.parameter_or("mode", Value::String("append".to_string()));

        let merged: ItemList = match mode.as_str().unwrap_or("append") {
            "append" => left.iter().chain(right.iter()).cloned().collect(),
            "combine" => {
                let len = left.len().max(right.len());
                (0..len)
                    .map(|i| {
                        let mut item = left.get(i).cloned().unwrap_or_default();
                        if let Some(other) = right.get(i) {
                            item.json.extend(other.json.clone());
                            item.binary.extend(other.binary.clone());
                        }
                        item
                    })
                    .collect()
            }
            other => {
                return Err(NodeError::InvalidParameter {
                    name: "mode".to_string(),
                    expected: "append or combine".to_string(),
                    actual: other.to_string(),
                })
            }
        };

        crate::items_output(&merged)
    }
}

/// Runs another registered workflow and returns its sink items
pub struct ExecuteWorkflowNode;

#[async_trait]
impl Node for ExecuteWorkflowNode {
    fn node_type(&self) -> &str {
        "flow.execute_workflow"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("flow.execute_workflow", "Execute Workflow")
            .with_category("flow")
            .with_description("Runs a sub-workflow and returns what its final nodes produced")
            .with_property(ParameterDefinition::required("workflowId", "Workflow to run"))
            .with_property(ParameterDefinition::optional(
                "input",
                "Data for the sub-workflow; defaults to the first input item",
                Value::Null,
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let workflow_id = ctx.require_str("workflowId")?;
        let input = match ctx.parameter("input") {
            Some(input) if !input.is_null() => input.clone(),
            _ => ctx
                .current_item()
                .map(Item::json_value)
                .unwrap_or(Value::Null),
        };

        ctx.events.info(format!("Running sub-workflow {}", workflow_id));
        let items = ctx.execute_workflow(workflow_id, input).await?;
        crate::items_output(&items)
    }
}
