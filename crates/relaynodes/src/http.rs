use async_trait::async_trait;
use relaycore::{Item, Node, NodeContext, NodeDescription, NodeError, ParameterDefinition};
use reqwest::Method;
use serde_json::{Map, Value};
use std::time::Duration;

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn method(ctx: &NodeContext) -> Result<Method, NodeError> {
        let raw = ctx
            .parameter("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        Method::from_bytes(raw.as_bytes()).map_err(|_| NodeError::InvalidParameter {
            name: "method".to_string(),
            expected: "HTTP method".to_string(),
            actual: raw.clone(),
        })
    }

    async fn send(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let url = ctx.require_str("url")?;
        let method = Self::method(ctx)?;

        let mut request = self.client.request(method.clone(), url);

        if let Some(Value::Object(headers)) = ctx.parameter("headers") {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }

        match ctx.parameter("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }

        if let Some(ms) = ctx.parameter("timeoutMs").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_millis(ms));
        }

        ctx.events.info(format!("{} {}", method, url));

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.to_string(), Value::String(value.to_string()));
            }
        }

        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        let fail_on_status = ctx
            .parameter("failOnStatus")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if fail_on_status && (status.is_client_error() || status.is_server_error()) {
            return Err(NodeError::ExecutionFailed(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }

        let mut json = Map::new();
        json.insert("status".to_string(), Value::from(status.as_u16()));
        json.insert("headers".to_string(), Value::Object(headers));
        json.insert("body".to_string(), body);
        crate::items_output(&[Item::new(json)])
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    fn description(&self) -> NodeDescription {
        NodeDescription::action("http.request", "HTTP Request")
            .with_category("http")
            .with_description("Make HTTP requests to external APIs")
            .with_property(ParameterDefinition::required("url", "Request URL"))
            .with_property(ParameterDefinition::optional(
                "method",
                "HTTP method",
                Value::String("GET".to_string()),
            ))
            .with_property(ParameterDefinition::optional(
                "headers",
                "Request headers",
                Value::Object(Map::new()),
            ))
            .with_property(ParameterDefinition::optional(
                "body",
                "Request body; objects are sent as JSON",
                Value::Null,
            ))
            .with_property(ParameterDefinition::optional(
                "timeoutMs",
                "Per-request timeout",
                Value::Null,
            ))
            .with_property(ParameterDefinition::optional(
                "failOnStatus",
                "Treat 4xx and 5xx responses as failures",
                Value::Bool(true),
            ))
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        tokio::select! {
            result = self.send(&ctx) => result,
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}
