use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::node_api::{config_str, config_u32, NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput};

pub struct HttpRequestNode;

#[async_trait]
impl NodeHandler for HttpRequestNode {
    fn node_type(&self) -> &'static str {
        "http-request"
    }

    async fn execute(&self, input: &NodeInput, _ctx: &dyn NodeContext) -> Result<NodeOutput, NodeExecutionError> {
        let method = config_str(&input.node_config, "method").unwrap_or_else(|| "GET".to_string());
        let url = config_str(&input.node_config, "url")
            .ok_or_else(|| NodeExecutionError::Failed("http-request node requires `url`".to_string()))?;
        let timeout_ms = config_u32(&input.node_config, "timeout_ms", 30_000);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms as u64))
            .build()
            .map_err(|e| NodeExecutionError::Failed(format!("http client build failed: {e}")))?;

        let mut builder = client.request(
            method
                .parse::<reqwest::Method>()
                .map_err(|e| NodeExecutionError::Failed(format!("invalid http method `{method}`: {e}")))?,
            &url,
        );

        if let Some(headers) = input.node_config.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    builder = builder.header(k, v);
                }
            }
        }
        if let Some(body) = input.node_config.get("body") {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            NodeExecutionError::Failed(common::error::sanitize(&format!("http request failed: {e}")))
        })?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| NodeExecutionError::Failed(format!("reading response body failed: {e}")))?;
        let body_json: common::types::JsonValue =
            serde_json::from_str(&body_text).unwrap_or(common::types::JsonValue::String(body_text));

        Ok(NodeOutput::new(json!({
            "status": status,
            "body": body_json,
        })))
    }
}
