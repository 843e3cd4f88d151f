use async_trait::async_trait;
use relaycore::{Node, NodeContext, NodeDescription, NodeError, ParameterDefinition};
use serde_json::Value;

/// Manual trigger: the caller's data becomes the run's first items
pub struct ManualTriggerNode;

#[async_trait]
impl Node for ManualTriggerNode {
    fn node_type(&self) -> &str {
        "trigger.manual"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::trigger("trigger.manual", "Manual Trigger", false)
            .with_description("Starts the workflow with the data passed by the caller")
    }

    // Never called by the engine, a passive trigger only forwards input
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        crate::items_output(ctx.items())
    }
}

/// Start trigger: emits its `data` parameter, or the caller's data when unset
pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn node_type(&self) -> &str {
        "trigger.start"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::trigger("trigger.start", "Start", true)
            .with_description("Starts the workflow with static or templated data")
            .with_property(ParameterDefinition::optional(
                "data",
                "Items to emit; expressions see the caller's data as $json",
                Value::Null,
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        match ctx.parameter("data") {
            Some(data) if !data.is_null() => {
                ctx.events.info("Starting with configured data");
                Ok(data.clone())
            }
            _ => crate::items_output(ctx.items()),
        }
    }
}
