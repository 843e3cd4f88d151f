use async_trait::async_trait;
use relaycore::{Node, NodeContext, NodeDescription, NodeError, ParameterDefinition};
use serde_json::Value;

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("debug.log", "Debug")
            .with_category("debug")
            .with_description("Logs input items for debugging")
            .with_property(ParameterDefinition::optional(
                "message",
                "Message printed before the items",
                Value::String("(no message)".to_string()),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = ctx
            .parameter("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");

        tracing::info!(node_id = %ctx.node_id, "DEBUG: {}", message);
        ctx.events.info(format!("DEBUG: {}", message));

        for (index, item) in ctx.items().iter().enumerate() {
            ctx.events.info(format!("  [{}] {}", index, item.json_value()));
        }

        crate::items_output(ctx.items())
    }
}
