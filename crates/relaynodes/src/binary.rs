//! Nodes moving data between item fields and the binary store.

use async_trait::async_trait;
use relaycore::{
    BinaryMetadata, Item, Node, NodeContext, NodeDescription, NodeError, ParameterDefinition,
};
use serde_json::Value;

fn string_param<'a>(ctx: &'a NodeContext, name: &str, default: &'a str) -> &'a str {
    ctx.parameter(name).and_then(Value::as_str).unwrap_or(default)
}

/// Store a text field as a binary attachment
pub struct BinaryFromTextNode;

#[async_trait]
impl Node for BinaryFromTextNode {
    fn node_type(&self) -> &str {
        "binary.from_text"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("binary.from_text", "Text to Binary")
            .with_category("binary")
            .with_description("Stores a text field as a binary attachment")
            .with_property(ParameterDefinition::required("field", "Field holding the text"))
            .with_property(ParameterDefinition::optional(
                "property",
                "Attachment name on the item",
                Value::String("data".to_string()),
            ))
            .with_property(ParameterDefinition::optional(
                "fileName",
                "File name recorded with the data",
                Value::Null,
            ))
            .with_property(ParameterDefinition::optional(
                "mimeType",
                "MIME type recorded with the data",
                Value::String("text/plain".to_string()),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let field = ctx.require_str("field")?;
        let property = string_param(&ctx, "property", "data");
        let mime_type = string_param(&ctx, "mimeType", "text/plain");
        let file_name = ctx
            .parameter("fileName")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut items = Vec::with_capacity(ctx.items().len());
        for item in ctx.items() {
            let text = match item.get(field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    return Err(NodeError::InvalidParameter {
                        name: field.to_string(),
                        expected: "text field on every item".to_string(),
                        actual: "missing".to_string(),
                    })
                }
            };

            let metadata = BinaryMetadata {
                file_name: file_name.clone(),
                mime_type: Some(mime_type.to_string()),
            };
            let handle = ctx.set_binary(text.into_bytes(), metadata).await?;
            items.push(item.clone().with_binary(property, handle));
        }

        crate::items_output(&items)
    }
}

/// Read a binary attachment back into a text field
pub struct BinaryToTextNode;

#[async_trait]
impl Node for BinaryToTextNode {
    fn node_type(&self) -> &str {
        "binary.to_text"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("binary.to_text", "Binary to Text")
            .with_category("binary")
            .with_description("Reads a binary attachment as UTF-8 text")
            .with_property(ParameterDefinition::optional(
                "property",
                "Attachment to read",
                Value::String("data".to_string()),
            ))
            .with_property(ParameterDefinition::optional(
                "target",
                "Field receiving the text",
                Value::String("text".to_string()),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let property = string_param(&ctx, "property", "data");
        let target = string_param(&ctx, "target", "text");

        let mut items: Vec<Item> = Vec::with_capacity(ctx.items().len());
        for item in ctx.items() {
            let handle = item.binary.get(property).ok_or_else(|| {
                NodeError::Binary(format!("item has no binary property '{}'", property))
            })?;
            let bytes = ctx.get_binary(handle).await?;
            let text = String::from_utf8(bytes)
                .map_err(|e| NodeError::Binary(format!("not valid UTF-8: {}", e)))?;

            let mut item = item.clone();
            item.json.insert(target.to_string(), Value::String(text));
            items.push(item);
        }

        crate::items_output(&items)
    }
}
