use async_trait::async_trait;
use relaycore::{Item, Node, NodeContext, NodeDescription, NodeError, ParameterDefinition};
use serde_json::{Map, Value};

/// Set fields on every input item
pub struct SetNode;

#[async_trait]
impl Node for SetNode {
    fn node_type(&self) -> &str {
        "transform.set"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("transform.set", "Set")
            .with_category("transform")
            .with_description("Adds or overwrites fields on each item")
            .with_property(ParameterDefinition::required("values", "Object of fields to set"))
            .with_property(ParameterDefinition::optional(
                "keepOnlySet",
                "Drop every field that is not in values",
                Value::Bool(false),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let values = match ctx.require_parameter("values")? {
            Value::Object(map) => map.clone(),
            other => {
                return Err(NodeError::InvalidParameter {
                    name: "values".to_string(),
                    expected: "object".to_string(),
                    actual: other.to_string(),
                })
            }
        };
        let keep_only_set = ctx
            .parameter("keepOnlySet")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // With no input the node still produces one item
        let inputs: Vec<Item> = if ctx.items().is_empty() {
            vec![Item::default()]
        } else {
            ctx.items().to_vec()
        };

        let items: Vec<Item> = inputs
            .into_iter()
            .map(|mut item| {
                if keep_only_set {
                    item.json = Map::new();
                }
                item.json.extend(values.clone());
                item
            })
            .collect();

        crate::items_output(&items)
    }
}

/// Parse a JSON string field of each item
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("transform.json_parse", "Parse JSON")
            .with_category("transform")
            .with_description("Parse JSON string")
            .with_property(ParameterDefinition::optional(
                "field",
                "Field holding the JSON text",
                Value::String("json".to_string()),
            ))
            .with_property(ParameterDefinition::optional(
                "target",
                "Field receiving the parsed value",
                Value::String("parsed".to_string()),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let field = ctx.parameter("field").and_then(Value::as_str).unwrap_or("json");
        let target = ctx.parameter("target").and_then(Value::as_str).unwrap_or("parsed");

        let mut items = Vec::with_capacity(ctx.items().len());
        for item in ctx.items() {
            let text = item.get(field).and_then(Value::as_str).ok_or_else(|| {
                NodeError::InvalidParameter {
                    name: field.to_string(),
                    expected: "string".to_string(),
                    actual: item
                        .get(field)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "missing".to_string()),
                }
            })?;

            let parsed: Value = serde_json::from_str(text)
                .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

            let mut item = item.clone();
            item.json.insert(target.to_string(), parsed);
            items.push(item);
        }

        crate::items_output(&items)
    }
}

/// Serialize each item's fields into a JSON string field
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("transform.json_stringify", "Stringify JSON")
            .with_category("transform")
            .with_description("Convert item fields to a JSON string")
            .with_property(ParameterDefinition::optional(
                "target",
                "Field receiving the JSON text",
                Value::String("json".to_string()),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let target = ctx.parameter("target").and_then(Value::as_str).unwrap_or("json");

        let mut items = Vec::with_capacity(ctx.items().len());
        for item in ctx.items() {
            let text = serde_json::to_string(&item.json)
                .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;
            let mut out = Item::default();
            out.json.insert(target.to_string(), Value::String(text));
            items.push(out);
        }

        crate::items_output(&items)
    }
}
