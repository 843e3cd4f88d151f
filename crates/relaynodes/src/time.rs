use async_trait::async_trait;
use chrono::Utc;
use relaycore::{
    ExecutionStateUpdate, Node, NodeContext, NodeDescription, NodeError, ParameterDefinition,
};
use serde_json::Value;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("time.delay", "Delay")
            .with_category("time")
            .with_description("Delay execution for specified milliseconds")
            .with_property(ParameterDefinition::optional(
                "delayMs",
                "How long to wait",
                Value::from(1000),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let delay_ms = ctx
            .parameter("delayMs")
            .and_then(Value::as_u64)
            .unwrap_or(1000);

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        // Recovery needs to know the run is parked, not stuck
        let until = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        ctx.update_state(ExecutionStateUpdate::waiting_until(Some(until)))
            .await?;

        let cancelled = tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => false,
            _ = ctx.cancellation.cancelled() => true,
        };

        ctx.update_state(ExecutionStateUpdate::waiting_until(None))
            .await?;

        if cancelled {
            return Err(NodeError::Cancelled);
        }

        // Pass through any inputs
        crate::items_output(ctx.items())
    }
}
